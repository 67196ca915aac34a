mod app;
mod cli;
mod config;
mod input;
mod model;
mod provider;
mod router;
mod scheduler;
mod snowflake;
mod table;
mod ui;

use anyhow::{Context, Result};
use app::{App, AppCommand};
use clap::Parser;
use cli::{CliArgs, Command, ListResource};
use config::Config;
use crossterm::event::{
    Event, EventStream, KeyEventKind, KeyboardEnhancementFlags, PopKeyboardEnhancementFlags,
    PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
    supports_keyboard_enhancement,
};
use futures::StreamExt;
use futures::future::{self, BoxFuture};
use model::{FetchScope, ViewKind};
use provider::DataProvider;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use scheduler::{BackgroundEvent, RefreshScheduler, timeout_message};
use snowflake::SnowflakeClient;
use std::io::{self, Stdout, Write};
use std::sync::Arc;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{Duration, MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;
const REDRAW_INTERVAL: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let config = config::load(args.context.as_deref())?.merge_overrides(&cli_overrides(&args));
    config.validate()?;

    let (log_tx, log_rx) = mpsc::unbounded_channel::<String>();
    let log_sink = match (&args.command, config.debug) {
        (_, false) => LogSink::Discard,
        (Some(_), true) => LogSink::Stderr,
        (None, true) => LogSink::Pane(log_tx),
    };
    let log_filter = if config.debug && args.log_filter == "info" {
        "info,floe=debug"
    } else {
        args.log_filter.as_str()
    };
    init_tracing(log_filter, log_sink)?;

    let fetch_timeout = Duration::from_secs(args.fetch_timeout_secs.max(1));
    let client = SnowflakeClient::new(&config, fetch_timeout)?;
    let scope = FetchScope {
        database: config.database.clone(),
        namespace: config.schema.clone(),
        parent: None,
    };

    let version = timeout(fetch_timeout, client.ping(&scope))
        .await
        .map_err(|_| anyhow::anyhow!("connection check {}", timeout_message(fetch_timeout)))?
        .with_context(|| format!("failed to connect to Snowflake as {}", config.user))?;
    info!(%version, context = %config.context_label(), "connected");

    match args.command {
        Some(Command::List {
            resource: ListResource::Services,
        }) => list_services(&client, &scope, fetch_timeout).await,
        None => {
            let mut app = App::new(
                config.user.clone(),
                config.database.clone(),
                config.schema.clone(),
                config.debug,
            );
            let provider: Arc<dyn DataProvider> = Arc::new(client);
            let refresh = Duration::from_secs(args.refresh_secs.max(1));
            run(&mut app, provider, fetch_timeout, refresh, log_rx).await
        }
    }
}

fn cli_overrides(args: &CliArgs) -> Config {
    let connection = &args.connection;
    let value = |field: &Option<String>| field.clone().unwrap_or_default();
    Config {
        account: value(&connection.account),
        user: value(&connection.user),
        token: value(&connection.token),
        token_type: value(&connection.token_type),
        host: value(&connection.host),
        database: value(&connection.database),
        schema: value(&connection.schema),
        warehouse: value(&connection.warehouse),
        role: value(&connection.role),
        context: value(&args.context),
        debug: args.debug,
    }
}

enum LogSink {
    Discard,
    Stderr,
    Pane(UnboundedSender<String>),
}

/// Forwards formatted log lines to the debug pane.
struct PaneWriter {
    tx: UnboundedSender<String>,
}

impl Write for PaneWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            let _ = self.tx.send(line.to_string());
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn init_tracing(level_filter: &str, sink: LogSink) -> Result<()> {
    let filter = EnvFilter::try_new(level_filter)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to initialize tracing filter")?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact();

    let _ = match sink {
        LogSink::Discard => builder.with_writer(io::sink).try_init(),
        LogSink::Stderr => builder.with_writer(io::stderr).try_init(),
        LogSink::Pane(tx) => builder
            .with_ansi(false)
            .without_time()
            .with_writer(move || PaneWriter { tx: tx.clone() })
            .try_init(),
    };

    Ok(())
}

async fn list_services(
    provider: &dyn DataProvider,
    scope: &FetchScope,
    fetch_timeout: Duration,
) -> Result<()> {
    let fetch = router::descriptor(ViewKind::Services).fetch;
    let set = timeout(fetch_timeout, fetch(provider, scope))
        .await
        .map_err(|_| anyhow::anyhow!("list services {}", timeout_message(fetch_timeout)))?
        .context("failed to list services")?;

    let mut stdout = io::stdout().lock();
    stdout
        .write_all(ui::render_box_table(&set.columns, &set.rows).as_bytes())
        .context("failed to write table")?;
    stdout.flush().context("failed to flush stdout")?;
    Ok(())
}

async fn run(
    app: &mut App,
    provider: Arc<dyn DataProvider>,
    fetch_timeout: Duration,
    refresh: Duration,
    log_rx: UnboundedReceiver<String>,
) -> Result<()> {
    let (tx, rx) = mpsc::unbounded_channel::<BackgroundEvent>();
    let mut scheduler =
        RefreshScheduler::new(provider, CancellationToken::new(), fetch_timeout, tx);

    let (mut terminal, keyboard_enhanced) = init_terminal()?;
    let run_result = run_loop(&mut terminal, app, &mut scheduler, refresh, rx, log_rx).await;
    scheduler.shutdown();
    let restore_result = restore_terminal(&mut terminal, keyboard_enhanced);

    match (run_result, restore_result) {
        (Err(run_error), Err(restore_error)) => Err(anyhow::anyhow!(
            "{run_error:#}\nterminal restore error: {restore_error:#}"
        )),
        (Err(error), _) => Err(error),
        (_, Err(error)) => Err(error),
        (Ok(()), Ok(())) => Ok(()),
    }
}

fn init_terminal() -> Result<(TuiTerminal, bool)> {
    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    let keyboard_enhanced = matches!(supports_keyboard_enhancement(), Ok(true));
    if keyboard_enhanced {
        execute!(
            stdout,
            EnterAlternateScreen,
            PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES)
        )
        .context("failed to enter alternate screen with keyboard enhancement")?;
    } else {
        execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;
    }
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("failed to create terminal backend")?;
    terminal.clear().context("failed to clear terminal")?;
    Ok((terminal, keyboard_enhanced))
}

fn restore_terminal(terminal: &mut TuiTerminal, keyboard_enhanced: bool) -> Result<()> {
    if keyboard_enhanced {
        execute!(terminal.backend_mut(), PopKeyboardEnhancementFlags)
            .context("failed to pop keyboard enhancement flags")?;
    }
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen")?;
    terminal.show_cursor().context("failed to show cursor")?;
    Ok(())
}

async fn run_loop(
    terminal: &mut TuiTerminal,
    app: &mut App,
    scheduler: &mut RefreshScheduler,
    refresh: Duration,
    mut background_rx: UnboundedReceiver<BackgroundEvent>,
    mut log_rx: UnboundedReceiver<String>,
) -> Result<()> {
    let mut reader = EventStream::new();
    let mut ticker = interval(refresh);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut redraw = interval(REDRAW_INTERVAL);
    redraw.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut interrupted = std::pin::pin!(tokio::signal::ctrl_c());
    let mut terminated = termination_signal();

    app.start_refresh(scheduler);

    loop {
        terminal
            .draw(|frame| ui::render(frame, app))
            .context("failed to render terminal frame")?;

        if !app.running() {
            break;
        }

        tokio::select! {
            maybe_event = reader.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        if let Some(action) = input::map_key(app.mode(), key) {
                            debug!("action={action:?}");
                            let command = app.apply_action(action);
                            execute_app_command(app, scheduler, command);
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        app.set_notice(format!("terminal event error: {error}"));
                    }
                    None => {
                        warn!("terminal event stream closed");
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                app.start_refresh(scheduler);
            }
            _ = redraw.tick() => {
                app.advance_spinner();
            }
            maybe_event = background_rx.recv() => {
                match maybe_event {
                    Some(BackgroundEvent::Fetch(outcome)) => {
                        let command = app.apply_fetch(outcome);
                        execute_app_command(app, scheduler, command);
                    }
                    Some(BackgroundEvent::Detail(outcome)) => app.apply_detail(outcome),
                    None => break,
                }
            }
            Some(line) = log_rx.recv() => {
                app.push_debug_line(line);
            }
            result = &mut interrupted => {
                if let Err(error) = result {
                    warn!("failed to listen for ctrl-c: {error}");
                }
                break;
            }
            _ = &mut terminated => {
                info!("received SIGTERM, shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Resolves on SIGTERM. The handler is installed before this returns.
#[cfg(unix)]
fn termination_signal() -> BoxFuture<'static, ()> {
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => Box::pin(async move {
            stream.recv().await;
        }),
        Err(error) => {
            warn!("failed to listen for SIGTERM: {error}");
            Box::pin(future::pending())
        }
    }
}

#[cfg(not(unix))]
fn termination_signal() -> BoxFuture<'static, ()> {
    Box::pin(future::pending())
}

fn execute_app_command(app: &mut App, scheduler: &mut RefreshScheduler, command: AppCommand) {
    match command {
        AppCommand::None => {}
        AppCommand::Refresh => {
            app.start_refresh(scheduler);
        }
        AppCommand::Describe { name, scope } => {
            let seq = scheduler.request_describe(name, scope);
            app.await_detail(seq);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::cli_overrides;
    use crate::cli::CliArgs;
    use clap::Parser;

    #[cfg(unix)]
    #[tokio::test]
    async fn sigterm_resolves_the_termination_future() {
        use super::termination_signal;
        use tokio::time::{Duration, timeout};

        let terminated = termination_signal();
        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .expect("run kill");
        assert!(status.success());
        timeout(Duration::from_secs(5), terminated)
            .await
            .expect("SIGTERM should end the wait");
    }

    #[test]
    fn cli_flags_become_config_overrides() {
        let args = CliArgs::parse_from([
            "floe",
            "--account",
            "xy123",
            "--schema",
            "APPS",
            "--debug",
        ]);
        let overrides = cli_overrides(&args);
        assert_eq!(overrides.account, "xy123");
        assert_eq!(overrides.schema, "APPS");
        assert!(overrides.user.is_empty());
        assert!(overrides.debug);
    }
}
