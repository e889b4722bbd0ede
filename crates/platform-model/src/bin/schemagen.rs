//! Prints the JSON Schema of the container specification so the request
//! layer can validate documents before handing them to the engine.

use platform_model::{ContainerSpec, Environment, GitProvider, Registry};

fn main() -> Result<(), serde_json::Error> {
    let schemas = serde_json::json!({
        "ContainerSpec": schemars::schema_for!(ContainerSpec),
        "Environment": schemars::schema_for!(Environment),
        "GitProvider": schemars::schema_for!(GitProvider),
        "Registry": schemars::schema_for!(Registry),
    });
    println!("{}", serde_json::to_string_pretty(&schemas)?);
    Ok(())
}
