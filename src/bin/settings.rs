use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hot_potato_server::server_utils::init_logging;
use hot_potato_server::settings_client::SettingsClient;
use hot_potato_server::types::GameConfig;
use tracing::error;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[arg(long, env = "SETTINGS_URL", default_value = "http://127.0.0.1:3000")]
    url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the server's current settings body.
    Get,
    /// Change selected fields and upload the full settings object.
    Set {
        #[arg(long)]
        timer_duration: Option<u32>,
        #[arg(long)]
        killer_timer_duration: Option<u32>,
        #[arg(long)]
        killer_cooldown: Option<u32>,
        /// Comma separated, e.g. `1,1.5,2,2.5`
        #[arg(long, value_delimiter = ',')]
        player_timer_rate: Option<Vec<f64>>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let client = SettingsClient::new(&cli.url).context("failed to build http client")?;

    match cli.command {
        Command::Get => {
            let body = client
                .fetch_raw()
                .await
                .with_context(|| format!("failed to fetch {}", client.settings_url()))?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Command::Set {
            timer_duration,
            killer_timer_duration,
            killer_cooldown,
            player_timer_rate,
        } => {
            let overrides = Overrides {
                timer_duration,
                killer_timer_duration,
                killer_cooldown,
                player_timer_rate,
            };
            match update_settings(&client, overrides).await {
                Ok(message) => println!("{message}"),
                Err(update_error) => {
                    error!("failed to update settings: {update_error:#}");
                    return Err(update_error);
                }
            }
        }
    }
    Ok(())
}

#[derive(Debug, Default)]
struct Overrides {
    timer_duration: Option<u32>,
    killer_timer_duration: Option<u32>,
    killer_cooldown: Option<u32>,
    player_timer_rate: Option<Vec<f64>>,
}

/// Reads the live settings, applies `overrides` and uploads the full object.
/// A failed read aborts before anything is sent, so untouched fields are
/// never replaced by defaults.
async fn update_settings(client: &SettingsClient, overrides: Overrides) -> Result<String> {
    let current = client
        .fetch()
        .await
        .with_context(|| format!("failed to read current settings from {}", client.settings_url()))?;
    let updated = apply_overrides(current, overrides);
    let message = client.save_config(&updated).await?;
    Ok(message)
}

fn apply_overrides(mut config: GameConfig, overrides: Overrides) -> GameConfig {
    if let Some(value) = overrides.timer_duration {
        config.timer_duration = value;
    }
    if let Some(value) = overrides.killer_timer_duration {
        config.killer_timer_duration = value;
    }
    if let Some(value) = overrides.killer_cooldown {
        config.killer_cooldown = value;
    }
    if let Some(value) = overrides.player_timer_rate {
        config.player_timer_rate = value;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn overrides_only_touch_given_fields() {
        let updated = apply_overrides(
            GameConfig::default(),
            Overrides {
                timer_duration: Some(60),
                player_timer_rate: Some(vec![1.0, 1.7, 2.1, 2.2]),
                ..Overrides::default()
            },
        );
        assert_eq!(updated.timer_duration, 60);
        assert_eq!(updated.killer_timer_duration, 5);
        assert_eq!(updated.killer_cooldown, 20);
        assert_eq!(updated.player_timer_rate, vec![1.0, 1.7, 2.1, 2.2]);
    }

    #[test]
    fn cli_parses_comma_separated_rates() {
        let cli = Cli::parse_from([
            "settings",
            "--url",
            "http://localhost:3000",
            "set",
            "--player-timer-rate",
            "1,1.5,2,2.5",
        ]);
        match cli.command {
            Command::Set {
                player_timer_rate, ..
            } => assert_eq!(player_timer_rate, Some(vec![1.0, 1.5, 2.0, 2.5])),
            Command::Get => panic!("expected set command"),
        }
    }

    async fn serve_settings(get_status: StatusCode) -> (String, Arc<AtomicUsize>) {
        let puts = Arc::new(AtomicUsize::new(0));
        let put_counter = puts.clone();
        let app = Router::new().route(
            "/api/settings",
            get(move || async move {
                (
                    get_status,
                    Json(json!({
                        "timerDuration": 45,
                        "killerTimerDuration": 3,
                        "killerCooldown": 12,
                        "playerTimerRate": [1, 1.2, 1.4, 1.6],
                    })),
                )
            })
            .put(move |Json(_body): Json<Value>| {
                let put_counter = put_counter.clone();
                async move {
                    put_counter.fetch_add(1, Ordering::SeqCst);
                    Json(json!({ "message": "Settings updated successfully" }))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server runs");
        });
        (format!("http://{addr}"), puts)
    }

    #[tokio::test]
    async fn failed_read_aborts_without_uploading() {
        let (base, puts) = serve_settings(StatusCode::INTERNAL_SERVER_ERROR).await;
        let client = SettingsClient::new(&base).expect("client");

        let result = update_settings(
            &client,
            Overrides {
                timer_duration: Some(60),
                ..Overrides::default()
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(puts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn successful_read_uploads_merged_settings() {
        let (base, puts) = serve_settings(StatusCode::OK).await;
        let client = SettingsClient::new(&base).expect("client");

        let message = update_settings(
            &client,
            Overrides {
                timer_duration: Some(60),
                ..Overrides::default()
            },
        )
        .await
        .expect("update succeeds");
        assert_eq!(message, "Settings updated successfully");
        assert_eq!(puts.load(Ordering::SeqCst), 1);
    }
}
