use anyhow::Context;
use async_trait::async_trait;
use dairy_tracker_lib::calendar::{month_name, MONTH_NAMES};
use dairy_tracker_lib::ledger::{format_litres, MonthlyLedger};
use dairy_tracker_lib::month_feed::MonthFeed;
use dairy_tracker_lib::notify::{ConfirmChoice, ConfirmPrompt, NoticeKind, Notifier};
use dairy_tracker_lib::session::Session;
use dairy_tracker_lib::store::SqliteStore;
use dairy_tracker_lib::{init_tracing, to_client_error, AppResult, TrackerConfig, TrackerCore};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::{watch, Mutex};

type InputLines = Arc<Mutex<Lines<BufReader<Stdin>>>>;

/// Prints notices and asks confirmations on the same stdin the command loop reads.
struct ConsoleNotifier {
    input: InputLines,
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    fn notify(&self, kind: NoticeKind, message: &str) {
        println!("[{}] {}", kind.as_str(), message);
    }

    async fn confirm(&self, prompt: &ConfirmPrompt) -> ConfirmChoice {
        println!("{}", prompt.title);
        println!("{} [{}/{}]", prompt.message, prompt.confirm_label, prompt.cancel_label);
        let mut input = self.input.lock().await;
        match input.next_line().await {
            Ok(Some(answer)) => {
                let answer = answer.trim();
                if answer.eq_ignore_ascii_case(&prompt.confirm_label)
                    || answer.eq_ignore_ascii_case("y")
                    || answer.eq_ignore_ascii_case("yes")
                {
                    ConfirmChoice::Confirm
                } else {
                    ConfirmChoice::Cancel
                }
            }
            _ => ConfirmChoice::Cancel,
        }
    }
}

enum FeedEvent {
    MonthChanged,
    Update(Option<AppResult<MonthlyLedger>>),
    Closed,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = TrackerConfig::load().context("invalid configuration")?;
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("cannot create {}", config.data_dir.display()))?;
    init_tracing(&config.log_dir()).context("cannot start logging")?;

    let store = Arc::new(SqliteStore::new(&config.database_path()).context("cannot open the record store")?);
    let input: InputLines = Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines()));
    let notifier = Arc::new(ConsoleNotifier { input: input.clone() });
    let core = TrackerCore::new(config, store, notifier);

    if core.seed_credentials_if_missing().await? {
        println!("Passkeys seeded from the environment.");
    }

    let dates = core.dates();
    println!("Dairy tracker, today is {}", dates.display_today());
    println!("Type `help` for commands.");

    let feed = core.current_month_feed().await?;
    let (month_tx, month_rx) = watch::channel(feed.month_index());
    let feed_task = tokio::spawn(watch_month(feed, month_rx));

    let session = core.open_session().await;
    loop {
        let line = {
            let mut input = input.lock().await;
            input.next_line().await.context("cannot read stdin")?
        };
        let Some(line) = line else {
            break;
        };
        let (command, argument) = match line.trim().split_once(char::is_whitespace) {
            Some((command, argument)) => (command.to_string(), argument.trim().to_string()),
            None => (line.trim().to_string(), String::new()),
        };

        let result = match command.as_str() {
            "" => Ok(()),
            "help" => {
                print_help();
                Ok(())
            }
            "passkey" => match session.set_passkey(&argument) {
                Ok(()) => core.validate_passkey(&session).await.map(|_| ()),
                Err(error) => Err(error),
            },
            "morning" => session.set_morning(&argument),
            "evening" => session.set_evening(&argument),
            "date" => session.set_date(&argument),
            "add" => core.submit(&session).await.map(|_| ()),
            "form" => {
                print_form(&session);
                Ok(())
            }
            "month" => match parse_month(&argument) {
                Some(index) => {
                    let _ = month_tx.send(index);
                    Ok(())
                }
                None => {
                    println!("Unknown month '{}'.", argument);
                    Ok(())
                }
            },
            "quit" | "exit" => break,
            other => {
                println!("Unknown command '{}'. Type `help`.", other);
                Ok(())
            }
        };

        // Validation and submission errors were already shown by the notifier.
        if let Err(error) = result {
            if !matches!(command.as_str(), "passkey" | "add") {
                println!("[error] {}", to_client_error(&error));
            }
        }
    }

    core.close_session(session.id()).await;
    drop(month_tx);
    let _ = feed_task.await;
    Ok(())
}

async fn watch_month(mut feed: MonthFeed, mut month_rx: watch::Receiver<u32>) {
    loop {
        let event = tokio::select! {
            changed = month_rx.changed() => match changed {
                Ok(()) => FeedEvent::MonthChanged,
                Err(_) => FeedEvent::Closed,
            },
            update = async { feed.next_update().await.map(|result| result.cloned()) } => FeedEvent::Update(update),
        };

        match event {
            FeedEvent::MonthChanged => {
                let month_index = *month_rx.borrow_and_update();
                if let Err(error) = feed.select_month(month_index).await {
                    println!("[error] {}", to_client_error(&error));
                }
            }
            FeedEvent::Update(Some(Ok(ledger))) => print_ledger(&ledger),
            FeedEvent::Update(Some(Err(error))) => println!("[error] {}", to_client_error(&error)),
            FeedEvent::Update(None) => {
                tracing::warn!(month = feed.month_index(), "month stream ended");
                if month_rx.changed().await.is_err() {
                    break;
                }
                let month_index = *month_rx.borrow_and_update();
                if let Err(error) = feed.select_month(month_index).await {
                    println!("[error] {}", to_client_error(&error));
                }
            }
            FeedEvent::Closed => break,
        }
    }
}

fn parse_month(raw: &str) -> Option<u32> {
    if let Ok(number) = raw.parse::<u32>() {
        return (1..=12).contains(&number).then(|| number - 1);
    }
    MONTH_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(raw))
        .and_then(|index| u32::try_from(index).ok())
}

fn print_ledger(ledger: &MonthlyLedger) {
    println!("{}: {} L", ledger.month_name, format_litres(ledger.total_litres));
    for entry in &ledger.entries {
        println!(
            "  {:>2}  morning {:>6}  evening {:>6}  total {}",
            entry.day,
            entry.morning.as_deref().unwrap_or("-"),
            entry.evening.as_deref().unwrap_or("-"),
            format_litres(entry.total_litres())
        );
    }
}

fn print_form(session: &Session) {
    match session.form() {
        Ok(form) => println!(
            "level {} | date {} | morning '{}' | evening '{}'",
            form.level.as_str(),
            form.date,
            form.morning,
            form.evening
        ),
        Err(error) => println!("[error] {}", to_client_error(&error)),
    }
}

fn print_help() {
    let months = (0..12)
        .filter_map(|index| month_name(index).ok())
        .collect::<Vec<_>>()
        .join(", ");
    println!("passkey <key>      unlock entries");
    println!("morning <litres>   set the morning volume");
    println!("evening <litres>   set the evening volume");
    println!("date <YYYY-MM-DD>  pick another date (prime only)");
    println!("add                save the entry");
    println!("form               show the current form");
    println!("month <1-12|name>  show another month ({})", months);
    println!("quit");
}
