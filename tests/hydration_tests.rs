use std::sync::Arc;

use calcserver::config::ConnectionInfo;
use calcserver::core::SignalValue;
use calcserver::db::{CoefficientHydrator, DbClient, RequestKind, SimulatedDatabase};
use calcserver::registry::SignalRegistry;
use calcserver::resilience::{DrainPolicy, PollPolicy};
use calcserver::telemetry::LogContext;
use tokio_test::assert_ok;

const HYDRATION: PollPolicy = PollPolicy {
    attempts: 20,
    interval_ms: 5,
};
const SETTLE: DrainPolicy = DrainPolicy {
    interval_ms: 1,
    max_wait_ms: 200,
};

async fn connected() -> (Arc<SimulatedDatabase>, DbClient) {
    let db = Arc::new(SimulatedDatabase::new());
    let client = DbClient::new(db.clone(), LogContext::new("db"));
    let info = ConnectionInfo {
        id: "coefficient".to_string(),
        database: "coef".to_string(),
        host: "localhost".to_string(),
        user: "calc".to_string(),
        password: "calc".to_string(),
        port: 5432,
    };
    assert_ok!(client.connect(&info).await);
    (db, client)
}

fn limits_registry() -> SignalRegistry {
    let mut registry = SignalRegistry::new();
    registry
        .resolve_coefficient("Limits", "Boiler", ["low", "high", "unit"])
        .unwrap();
    registry
}

#[tokio::test]
async fn test_blocking_hydration_parses_cells() {
    let (db, client) = connected().await;
    db.seed_table(
        "coefficient",
        "limits",
        &["code", "low", "high", "unit"],
        &[&["Boiler", "3.14", "N/A", "bar"]],
    );

    let mut registry = limits_registry();
    let mut hydrator = CoefficientHydrator::new("coefficient", LogContext::new("coefficients"));
    hydrator.prepare(&registry);

    assert_eq!(assert_ok!(hydrator.request(&client).await), 1);
    let applied = hydrator
        .collect(&client, &mut registry, true, HYDRATION, SETTLE)
        .await;
    assert_eq!(applied, 1);
    assert_eq!(hydrator.outstanding(), 0);

    let id = registry.find_coefficient("Boiler", Some("Limits")).unwrap();
    let rows = &registry.coefficient(id).rows;
    assert_eq!(rows["low"], Some(SignalValue::Real(3.14)));
    assert_eq!(rows["high"], Some(SignalValue::Text("N/A".into())));
    assert_eq!(rows["unit"], Some(SignalValue::Text("bar".into())));

    let select = db
        .journal()
        .into_iter()
        .find(|s| s.kind == RequestKind::Select && s.table_tag == "Limits")
        .unwrap();
    assert_eq!(select.query, "SELECT * FROM limits");
}

#[tokio::test]
async fn test_missing_row_leaves_values() {
    let (db, client) = connected().await;
    db.seed_table("coefficient", "limits", &["code", "low"], &[&["Other", "1"]]);

    let mut registry = limits_registry();
    let mut hydrator = CoefficientHydrator::new("coefficient", LogContext::new("coefficients"));
    hydrator.prepare(&registry);
    assert_ok!(hydrator.request(&client).await);
    hydrator
        .collect(&client, &mut registry, true, HYDRATION, SETTLE)
        .await;

    let id = registry.find_coefficient("Boiler", None).unwrap();
    assert!(registry.coefficient(id).rows.values().all(Option::is_none));
}

#[tokio::test]
async fn test_non_blocking_keeps_pending_reads() {
    let (db, client) = connected().await;
    db.seed_table("coefficient", "limits", &["code", "low"], &[&["Boiler", "2"]]);

    let mut registry = limits_registry();
    let mut hydrator = CoefficientHydrator::new("coefficient", LogContext::new("coefficients"));
    hydrator.prepare(&registry);

    db.set_paused(true);
    assert_eq!(assert_ok!(hydrator.request(&client).await), 1);
    let applied = hydrator
        .collect(&client, &mut registry, false, HYDRATION, SETTLE)
        .await;
    assert_eq!(applied, 0);
    assert_eq!(hydrator.outstanding(), 1);

    // one read per table while the previous one is pending
    assert_eq!(assert_ok!(hydrator.request(&client).await), 0);
    assert_eq!(db.journal().len(), 1);

    db.set_paused(false);
    assert!(client.wait_idle(SETTLE).await);
    let applied = hydrator
        .collect(&client, &mut registry, false, HYDRATION, SETTLE)
        .await;
    assert_eq!(applied, 1);
    assert_eq!(hydrator.outstanding(), 0);

    let id = registry.find_coefficient("Boiler", None).unwrap();
    assert_eq!(registry.coefficient(id).rows["low"], Some(SignalValue::Real(2.0)));
}

#[tokio::test]
async fn test_blocking_hydration_abandons_lost_reads() {
    let (db, client) = connected().await;
    let mut registry = limits_registry();
    let mut hydrator = CoefficientHydrator::new("coefficient", LogContext::new("coefficients"));
    hydrator.prepare(&registry);

    db.set_paused(true);
    assert_ok!(hydrator.request(&client).await);
    let applied = hydrator
        .collect(
            &client,
            &mut registry,
            true,
            PollPolicy {
                attempts: 3,
                interval_ms: 1,
            },
            DrainPolicy {
                interval_ms: 1,
                max_wait_ms: 10,
            },
        )
        .await;

    assert_eq!(applied, 0);
    assert_eq!(hydrator.outstanding(), 0);
}
