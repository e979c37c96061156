use rstest::rstest;

use crate::core::client::kubernetes::cluster::MockClusterClient;
use crate::core::client::kubernetes::{ensure_pvc, PodObservation};

#[rstest]
#[tokio::test]
async fn existing_claim_skips_creation() {
    let mut cluster = MockClusterClient::new();
    cluster.expect_list_pvc_names().returning(|_| Ok(vec!["claim".to_string(), "other".to_string()]));
    cluster.expect_create_pvc().times(0);

    ensure_pvc(&cluster, "default", "claim", "1Gi", None).await.unwrap();
}

#[rstest]
#[tokio::test]
async fn missing_claim_is_created() {
    let mut cluster = MockClusterClient::new();
    cluster.expect_list_pvc_names().returning(|_| Ok(vec!["other".to_string()]));
    cluster
        .expect_create_pvc()
        .withf(|namespace, name, size, class| {
            namespace == "default" && name == "claim" && size == "1Gi" && class.as_deref() == Some("fast")
        })
        .times(1)
        .returning(|_, _, _, _| Ok(()));

    ensure_pvc(&cluster, "default", "claim", "1Gi", Some("fast")).await.unwrap();
}

#[rstest]
#[case("Succeeded", true)]
#[case("Failed", true)]
#[case("Running", false)]
#[case("Pending", false)]
fn terminal_pod_phases(#[case] phase: &str, #[case] terminal: bool) {
    let observed = PodObservation { phase: phase.to_string(), ..Default::default() };
    assert_eq!(observed.is_terminal(), terminal);
}
