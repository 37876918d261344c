use badge_quest::configuration::get_configuration;
use badge_quest::expiry::run_worker_until_stopped as run_expiry_worker;
use badge_quest::startup::Application;
use badge_quest::telegram::run_worker_until_stopped as run_telegram_bot;
use badge_quest::telemetry::{get_subscriber, init_subscriber};
use std::fmt::{Debug, Display};
use tokio::task::JoinError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = get_subscriber("badge_quest".into(), "info".into(), std::io::stdout);
    init_subscriber(subscriber);

    let configuration = get_configuration().expect("Failed to read configuration.");
    let application = Application::build(configuration.clone()).await?;
    tracing::info!(port = application.port(), "Listening");

    let application_task = tokio::spawn(application.run_until_stopped());
    let expiry_task = tokio::spawn(run_expiry_worker(configuration.clone()));
    let bot_enabled = configuration.telegram.bot_enabled;
    let bot_task = tokio::spawn(async move {
        if bot_enabled {
            run_telegram_bot(configuration).await
        } else {
            tracing::info!("Telegram verification bot is disabled");
            std::future::pending().await
        }
    });

    tokio::select! {
        o = application_task => report_exit("API", o),
        o = expiry_task => report_exit("Expiry worker", o),
        o = bot_task => report_exit("Telegram verification bot", o),
    };

    Ok(())
}

fn report_exit(task_name: &str, outcome: Result<Result<(), impl Debug + Display>, JoinError>) {
    match outcome {
        Ok(Ok(())) => {
            tracing::info!("{} has exited", task_name)
        }
        Ok(Err(e)) => {
            tracing::error!(
                error.cause_chain = ?e,
                error.message = %e,
                "{} failed",
                task_name
            )
        }
        Err(e) => {
            tracing::error!(
                error.cause_chain = ?e,
                error.message = %e,
                "{} task failed to complete",
                task_name
            )
        }
    }
}
