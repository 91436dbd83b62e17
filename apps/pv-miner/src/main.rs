mod cli;
mod follow;
mod settings;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use luxos_client::{Applied, MinerClient, PoolSpec, SolarPlanner, Verification};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{BoardAction, Cli, Command, PoolAction};
use crate::settings::{FileSettings, FollowSettings, Settings};

fn init_tracing(default_level: &str) {
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter_layer)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let file = FileSettings::load(cli.connection.config.as_deref())?;

    // Planning needs no miner.
    if let Command::Plan { watts, current } = &cli.command {
        return print_plan(&file.follow, *watts, current.as_deref());
    }

    let settings = Settings::resolve(file, &cli.connection)?;
    info!(host = %settings.client.normalized_host(), "connecting to miner");
    let client = Arc::new(MinerClient::new(settings.client.clone()).context("invalid miner settings")?);

    let result = run(client.clone(), &settings, cli.command).await;
    client.close().await;
    result
}

async fn run(client: Arc<MinerClient>, settings: &Settings, command: Command) -> Result<()> {
    match command {
        Command::Probe => {
            if !client.test_connection().await {
                bail!("miner {} is not reachable", settings.client.normalized_host());
            }
            let version = client.get_version().await?;
            print_json(&version)?;
        }
        Command::Stats { raw } => {
            let snapshot = client.snapshot().await?;
            if raw {
                print_json(&snapshot)?;
            } else {
                print_json(&snapshot.summary())?;
            }
        }
        Command::Boards => {
            for board in client.boards().await? {
                println!(
                    "board {}: {} status={} hashrate={} temp={}",
                    board.index,
                    match board.enabled {
                        Some(true) => "enabled",
                        Some(false) => "disabled",
                        None => "unknown",
                    },
                    board.status.as_deref().unwrap_or("-"),
                    board
                        .hashrate_ths
                        .map(|ths| format!("{ths:.2} TH/s"))
                        .unwrap_or_else(|| "-".into()),
                    board
                        .temperature
                        .map(|c| format!("{c:.1}C"))
                        .unwrap_or_else(|| "-".into()),
                );
            }
        }
        Command::Pause => {
            let outcome = client.pause_mining().await?;
            println!("sleep: {:?}", outcome.disposition);
        }
        Command::Resume => {
            let outcome = client.resume_mining().await?;
            println!("wakeup: {:?}", outcome.disposition);
        }
        Command::Profiles { details } => {
            if details {
                let mut infos = Vec::new();
                for name in client.list_profiles().await {
                    match client.profile_details(&name).await {
                        Ok(info) => infos.push(info),
                        Err(err) => warn!(profile = %name, error = %err, "no details"),
                    }
                }
                print_json(&infos)?;
            } else {
                for name in client.list_profiles().await {
                    println!("{name}");
                }
            }
        }
        Command::Profile { name } => {
            client.apply_profile(&name).await?;
            println!("profile {name} applied");
        }
        Command::Board { index, action } => {
            let change = match action {
                BoardAction::Enable => client.enable_board(index).await?,
                BoardAction::Disable => client.disable_board(index).await?,
            };
            match change.verification {
                Verification::Confirmed => println!("board {index}: confirmed"),
                Verification::Mismatch { expected, observed } => println!(
                    "board {index}: accepted but still {} (wanted {}); firmware may ignore per-board control",
                    enabled_word(observed),
                    enabled_word(expected)
                ),
                Verification::Unavailable { reason } => {
                    println!("board {index}: accepted, not verified ({reason})")
                }
            }
        }
        Command::Restart => {
            client.restart_miner().await?;
            println!("restart requested");
        }
        Command::Pool { action } => match action {
            PoolAction::Add { url, user, password } => {
                let response = client
                    .add_pool(&PoolSpec::new(url, user).with_password(password))
                    .await?;
                println!("{}", response.message().unwrap_or("pool added"));
            }
            PoolAction::Switch { id } => {
                client.switch_pool(id).await?;
                println!("pool {id} active");
            }
        },
        Command::Frequency { mhz } => {
            client.set_frequency(mhz).await?;
            println!("frequency set to {mhz} MHz");
        }
        Command::Follow {
            watts_file,
            interval,
        } => {
            let interval = interval
                .map(Duration::from_secs)
                .unwrap_or_else(|| settings.follow.interval());
            follow::run(client, &settings.follow, watts_file, interval).await?;
        }
        Command::Plan { .. } => unreachable!("plan is answered before connecting"),
    }
    Ok(())
}

fn print_plan(follow: &FollowSettings, watts: f64, current: Option<&str>) -> Result<()> {
    let planner = SolarPlanner::default().with_sleep_below(follow.sleep_below_watts);
    let current = current.map(|name| match name {
        "sleep" => Applied::Sleeping,
        profile => Applied::Profile(profile.to_string()),
    });
    print_json(&planner.plan(watts, current.as_ref()))
}

fn enabled_word(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to encode output")?;
    println!("{text}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_runs_without_a_miner() {
        let follow = FollowSettings::default();
        print_plan(&follow, -50.0, Some("sleep")).unwrap();
        print_plan(&follow, 3150.0, Some("285MHz")).unwrap();
        print_plan(&follow, f64::NAN, None).unwrap();
    }
}
