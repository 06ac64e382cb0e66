use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use clockface_client::RpcClient;
use clockface_core::{DialogContext, EmployeeId, SettingsSource};
use tracing_subscriber::EnvFilter;

mod config;
mod dialog;
mod shell;

use config::Config;
use dialog::DialogOutcome;

#[derive(Parser)]
#[command(name = "clockface", about = "Face-verified attendance check-in / check-out")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check an employee in after verifying their face
    CheckIn {
        /// Employee record ID
        #[arg(short, long)]
        employee: u64,
    },
    /// Check an employee out after verifying their face
    CheckOut {
        /// Employee record ID
        #[arg(short, long)]
        employee: u64,
    },
    /// Show server and face recognition status
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::CheckIn { employee } => {
            attend(&config, DialogContext::check_in(EmployeeId(employee))).await?;
        }
        Commands::CheckOut { employee } => {
            attend(&config, DialogContext::check_out(EmployeeId(employee))).await?;
        }
        Commands::Status { json } => {
            let client = RpcClient::new(config.client_config())?;
            let setting = client.face_recognition_enabled().await;
            if json {
                let value = serde_json::json!({
                    "server_url": client.base_url(),
                    "camera_device": config.camera_device,
                    "face_recognition": setting.as_ref().ok(),
                    "error": setting.as_ref().err().map(|e| e.to_string()),
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("server:           {}", client.base_url());
                println!("camera:           {}", config.camera_device);
                match setting {
                    Ok(true) => println!("face recognition: enabled"),
                    Ok(false) => println!("face recognition: disabled"),
                    Err(e) => println!("face recognition: unknown ({e})"),
                }
            }
        }
        Commands::Devices => {
            let devices = clockface_hw::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
    }

    Ok(())
}

async fn attend(config: &Config, ctx: DialogContext) -> Result<()> {
    tracing::info!(employee = %ctx.employee_id, direction = ctx.direction(), "clockface starting");

    match dialog::run(config, ctx).await? {
        DialogOutcome::Recorded { checkout } | DialogOutcome::RecordedWithoutFace { checkout } => {
            println!("{} recorded.", if checkout { "Check-out" } else { "Check-in" });
        }
        DialogOutcome::RecordFailed { checkout, reason } => {
            bail!(
                "face matched but the {} was not recorded: {reason}",
                if checkout { "check-out" } else { "check-in" }
            )
        }
        DialogOutcome::Cancelled => println!("Cancelled."),
        DialogOutcome::GaveUp { attempts } => {
            bail!("face not matched after {attempts} attempts")
        }
    }
    Ok(())
}
