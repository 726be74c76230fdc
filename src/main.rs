use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use calcserver::config::{ConnectionInfo, ConnectionSettings, ServerSettings};
use calcserver::db::SimulatedDatabase;
use calcserver::telemetry::Telemetry;
use calcserver::CalcServer;

fn demo_connection(database: &str) -> Result<ConnectionInfo> {
    let info = serde_json::from_value(serde_json::json!({
        "DataBaseName": database,
        "HostName": "localhost",
        "UserName": "calc",
        "Password": "calc"
    }))?;
    Ok(info)
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut settings = match std::env::args().nth(1) {
        Some(path) => ServerSettings::load(&PathBuf::from(path))?,
        None => ServerSettings::default(),
    };
    let telemetry = Telemetry::init(&settings.log)?;

    println!("Calculation server demo (simulated database)");
    println!("=============================================\n");

    let database = Arc::new(SimulatedDatabase::new());
    database.seed_table(
        "coefficient",
        "limits",
        &["code", "k", "b", "low", "high"],
        &[&["Boiler", "2.0", "1.0", "10", "90"]],
    );

    let work_dir = std::env::temp_dir().join("calcserver-demo");
    std::fs::create_dir_all(&work_dir).context("Failed to create demo directory")?;
    settings.input_file = work_dir.join("ValueInputSignals.json");

    let mut connections = ConnectionSettings::default();
    connections.insert("output", demo_connection("calc_out")?);
    connections.insert("coefficient", demo_connection("calc_coef")?);

    let mut server = CalcServer::connect_with(
        settings,
        &connections,
        database.clone(),
        telemetry.context("server"),
    )
    .await?;
    server.set_timestamp(1_700_000_000);

    let modules = server.register_builtin_modules();
    println!("Registered {} built-in modules", modules);

    let document = serde_json::json!([
        {
            "Type": "Scale",
            "Inputs": [{"code": "Temperature", "KKS": "KKS_001", "type": "d"}],
            "Coefficients": [{"table_name": "Limits", "code_signals": [{"code": "Boiler", "row": ["k", "b"]}]}],
            "Outputs": [{"code": "ScaledTemperature", "table_col": "scaled", "table_name": "Trend"}]
        },
        {
            "Type": "LimitAlarm",
            "Inputs": [{"code": "Temperature"}],
            "Coefficients": [{"table_name": "Limits", "code_signals": [{"code": "Boiler", "row": ["low", "high"]}]}],
            "Outputs": [{"code": "TemperatureAlarm", "table_col": "temperature", "table_name": "Alarm6"}]
        }
    ]);
    let blocks = server.create_blocks_from_json(&document)?;
    println!("Created {} blocks", blocks);

    server.prepare().await?;
    println!("Schema reconciled, coefficients hydrated\n");

    for (tick, temperature) in [42.0, 95.5, 3.0].into_iter().enumerate() {
        let values = serde_json::json!({ "KKS_001": temperature });
        std::fs::write(server.input_file(), values.to_string())
            .context("Failed to write input values")?;

        let summary = server.calc_one_step(tick as f64, 1.0).await?;
        println!(
            "--- Tick {} (t = {}) --- rows written: {}, suppressed: {}",
            tick + 1,
            server.timestamp(),
            summary.submitted,
            summary.suppressed
        );
        println!("{}", serde_json::to_string_pretty(&server.debug_snapshot(tick as f64, 1.0))?);
    }

    let metrics = server.metrics().snapshot();
    server.shutdown().await;

    for table in database.table_names("output") {
        if let Some(contents) = database.table("output", &table) {
            println!("\n{} {:?}", table, contents.columns);
            for row in &contents.rows {
                println!("  {:?}", row);
            }
        }
    }
    println!("\nMetrics: {}", serde_json::to_string(&metrics)?);

    telemetry.shutdown();
    Ok(())
}
