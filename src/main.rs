use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    trendlens_lib::init_logging();

    let mut args = std::env::args().skip(1);
    let Some(db_path) = args.next().map(PathBuf::from) else {
        eprintln!("usage: trendlens <db-path> [settings.json]");
        return ExitCode::from(2);
    };
    let settings_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| default_settings_path(&db_path));

    match trendlens_lib::run(&db_path, &settings_path).await {
        Ok(report) => {
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{json}"),
                Err(e) => log::error!("failed to serialize report: {e}"),
            }
            if report.failures.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            log::error!("trend analysis failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn default_settings_path(db_path: &Path) -> PathBuf {
    db_path.with_file_name("settings.json")
}
