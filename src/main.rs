use std::process::ExitCode;

use merge_train_scheduler::config::SchedulerConfig;
use merge_train_scheduler::persistence::CarStore;
use merge_train_scheduler::train::Train;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Reads the car store from disk and prints every train it holds. Nothing
/// is written, so it can run next to a live worker.
fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "merge_train_scheduler=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SchedulerConfig::from_env();
    let table = match CarStore::load_table(&config.state_dir) {
        Ok(table) => table,
        Err(e) => {
            tracing::error!(dir = %config.state_dir.display(), error = %e, "Failed to load car store");
            return ExitCode::FAILURE;
        }
    };

    for key in table.train_keys() {
        let train = Train::new(&table, key.clone());
        println!("{key} ({} cars)", train.car_count());
        for car in table.active_for(&key) {
            let Some(view) = table.car(car.id) else {
                continue;
            };
            let index = view
                .index()
                .map_or_else(|| "-".to_string(), |i| i.to_string());
            let pipeline = car
                .pipeline
                .as_ref()
                .map(|p| format!("{} {:?}", p.id, p.status))
                .unwrap_or_else(|| "none".to_string());
            println!(
                "  {index}. {} {} {} pipeline={pipeline}",
                car.id, car.merge_request_id, car.status
            );
        }
    }
    ExitCode::SUCCESS
}
