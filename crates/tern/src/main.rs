//
// main.rs
//
// Command line entry point
//

use std::env;

use anyhow::Context;
use tern::config::{parse_service_config, ProjectServiceConfig};

fn print_usage() {
    println!("tern {}, an incremental project graph server.", env!("CARGO_PKG_VERSION"));
    print!(
        r#"
Usage: tern [OPTIONS]

Available options:

--stdio                      Serve line-delimited JSON requests on stdio
--settings <FILE>            Read service settings from a JSON file
--version                    Print the version
--help                       Print this help message

"#
    );
}

fn load_settings(path: &str) -> anyhow::Result<ProjectServiceConfig> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read settings file '{path}'"))?;
    let value: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("Failed to parse settings file '{path}'"))?;
    Ok(parse_service_config(&value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut argv = env::args();
    argv.next(); // skip executable name

    let mut use_stdio = false;
    let mut settings: Option<String> = None;

    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "--stdio" => use_stdio = true,
            "--settings" => {
                let Some(path) = argv.next() else {
                    return Err(anyhow::anyhow!("Missing value for '--settings'"));
                };
                settings = Some(path);
            }
            "--version" => {
                println!("tern {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_usage();
                return Ok(());
            }
            other => {
                return Err(anyhow::anyhow!("Unknown argument: '{other}'"));
            }
        }
    }

    if !use_stdio {
        print_usage();
        return Ok(());
    }

    env_logger::init();

    let config = match settings {
        Some(path) => load_settings(&path)?,
        None => ProjectServiceConfig::default(),
    };
    tern::server::run_stdio(config).await
}
