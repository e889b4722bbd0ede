//! Object naming
//!
//! Every name is a pure function of the container `iid` so lookups never
//! need stored state.

/// Claim template name on StatefulSets
pub const CLAIM_TEMPLATE: &str = "data";

/// Volume name used for the data mount
pub const DATA_VOLUME: &str = "data";

/// Deployment, StatefulSet, CronJob, HPA, Service and single PVC name
pub fn primary(iid: &str) -> String {
    iid.to_string()
}

pub fn headless_service(iid: &str) -> String {
    format!("{}-headless", iid)
}

/// PVC created by the StatefulSet controller for one ordinal
pub fn stateful_claim(iid: &str, ordinal: i32) -> String {
    format!("{}-{}-{}", CLAIM_TEMPLATE, iid, ordinal)
}

/// Ordinal of a StatefulSet claim, `None` for foreign names
pub fn stateful_claim_ordinal(iid: &str, claim: &str) -> Option<i32> {
    claim
        .strip_prefix(&format!("{}-{}-", CLAIM_TEMPLATE, iid))
        .and_then(|rest| rest.parse().ok())
        .filter(|ordinal: &i32| *ordinal >= 0)
}

pub fn path_ingress(iid: &str) -> String {
    format!("{}-path", iid)
}

pub fn subdomain_ingress(iid: &str) -> String {
    format!("{}-subdomain", iid)
}

pub fn custom_domain_ingress(iid: &str) -> String {
    format!("{}-domain", iid)
}

/// TLS secret for a custom domain ingress
pub fn custom_domain_tls(iid: &str) -> String {
    format!("{}-domain-tls", iid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_ordinal() {
        assert_eq!(stateful_claim("db", 2), "data-db-2");
        assert_eq!(stateful_claim_ordinal("db", "data-db-2"), Some(2));
        assert_eq!(stateful_claim_ordinal("db", "data-dbx-2"), None);
        assert_eq!(stateful_claim_ordinal("db", "data-db-two"), None);
        // `data-db-2-1` belongs to a container named `db-2`
        assert_eq!(stateful_claim_ordinal("db", "data-db-2-1"), None);
    }
}
