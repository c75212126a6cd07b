mod actions;
mod app;
mod backend;
mod channel;
mod cli;
mod config;
mod controller;
mod demo;
mod error;
mod fetcher;
mod guard;
mod input;
mod k8s;
mod model;
mod state;
mod ui;

use anyhow::{Context, Result};
use app::{App, AppCommand};
use backend::{Backends, ErrorSink, StatusLineSink};
use clap::Parser;
use cli::CliArgs;
use config::RuntimeConfig;
use controller::ResourceListController;
use crossterm::event::{
    Event, EventStream, KeyEventKind, KeyboardEnhancementFlags, PopKeyboardEnhancementFlags,
    PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
    supports_keyboard_enhancement,
};
use demo::SimulatedPlatform;
use futures::StreamExt;
use k8s::KubeGateway;
use model::ScopeKey;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use std::fs::OpenOptions;
use std::io::{self, Stdout};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;
const REDRAW_INTERVAL: Duration = Duration::from_secs(1);
const DEMO_LATENCY: Duration = Duration::from_millis(350);
const DEMO_SETTLE_AFTER: Duration = Duration::from_secs(6);

/// Backends plus what the view needs to know about them.
struct Session {
    backends: Backends,
    label: String,
    namespace: Option<String>,
    namespaces: Vec<String>,
    reconciler: Option<JoinHandle<()>>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(&args.log_filter, args.log_file.as_deref())?;

    let config = RuntimeConfig::load()?.apply_cli(&args);
    if let Some(source) = &config.source {
        info!(%source, "using runtime config");
    }
    if args.all_namespaces && args.namespace.is_some() {
        warn!("both --all-namespaces and --namespace were provided, using all namespaces");
    }

    let (error_tx, error_rx) = mpsc::unbounded_channel();
    let errors: Arc<dyn ErrorSink> = Arc::new(StatusLineSink::new(error_tx));
    let session = if args.demo {
        demo_session(&args, &config, errors)
    } else {
        cluster_session(&args, &config, errors).await?
    };

    let namespace = if args.all_namespaces {
        None
    } else {
        session.namespace.clone()
    };
    let scope = ScopeKey::new(args.project, args.cluster, namespace);
    let mut app = App::new(session.label.clone(), scope, session.namespaces.clone());
    let mut controller =
        ResourceListController::new(session.backends.clone(), config.controller_settings());

    let result = run(&mut app, &mut controller, error_rx).await;
    if controller.is_mounted() {
        controller.unmount();
    }
    if let Some(reconciler) = session.reconciler {
        reconciler.abort();
    }
    result
}

fn init_tracing(level_filter: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_new(level_filter)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to initialize tracing filter")?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact();

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            let _ = builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = builder.with_writer(std::io::sink).try_init();
        }
    }

    Ok(())
}

fn demo_session(args: &CliArgs, config: &RuntimeConfig, errors: Arc<dyn ErrorSink>) -> Session {
    let platform = SimulatedPlatform::new(DEMO_LATENCY, DEMO_SETTLE_AFTER);
    let reconciler = platform.spawn_reconciler();
    let namespaces = if config.namespaces.is_empty() {
        demo::DEMO_NAMESPACES.iter().map(|name| name.to_string()).collect()
    } else {
        config.namespaces.clone()
    };
    let namespace = args
        .namespace
        .clone()
        .or_else(|| namespaces.first().cloned());

    Session {
        backends: platform.backends(errors),
        label: "demo platform".to_string(),
        namespace,
        namespaces,
        reconciler: Some(reconciler),
    }
}

async fn cluster_session(
    args: &CliArgs,
    config: &RuntimeConfig,
    errors: Arc<dyn ErrorSink>,
) -> Result<Session> {
    let gateway = Arc::new(KubeGateway::connect(args.context.clone()).await?);
    info!(context = gateway.context(), cluster = gateway.cluster(), "connected");

    let namespaces = if config.namespaces.is_empty() {
        match gateway.namespaces().await {
            Ok(names) => names,
            Err(error) => {
                warn!("namespace discovery failed: {}", compact_error(&error));
                Vec::new()
            }
        }
    } else {
        config.namespaces.clone()
    };
    let namespace = args
        .namespace
        .clone()
        .or_else(|| Some(gateway.default_namespace().to_string()));

    Ok(Session {
        label: gateway.context().to_string(),
        backends: Backends {
            source: gateway.clone(),
            notices: gateway.clone(),
            mutations: gateway,
            errors,
        },
        namespace,
        namespaces,
        reconciler: None,
    })
}

async fn run(
    app: &mut App,
    controller: &mut ResourceListController,
    error_rx: mpsc::UnboundedReceiver<String>,
) -> Result<()> {
    let (mut terminal, keyboard_enhanced) = init_terminal()?;
    let run_result = run_loop(&mut terminal, app, controller, error_rx).await;
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
    controller: &mut ResourceListController,
    mut error_rx: mpsc::UnboundedReceiver<String>,
) -> Result<()> {
    let mut reader = EventStream::new();
    let mut redraw = interval(REDRAW_INTERVAL);
    redraw.set_missed_tick_behavior(MissedTickBehavior::Skip);

    controller.mount(app.scope().clone());
    app.sync(controller.state());

    loop {
        terminal
            .draw(|frame| ui::render(frame, app))
            .context("failed to render terminal frame")?;

        if !app.is_running() {
            break;
        }

        tokio::select! {
            maybe_event = reader.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        if let Some(action) = input::map_key(app.input_mode(), key) {
                            debug!("action={action:?}");
                            let command = app.apply_action(action);
                            execute_app_command(app, controller, command);
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        app.set_status(format!("terminal event error: {error}"));
                    }
                    None => {
                        app.set_status("terminal event stream closed");
                        break;
                    }
                }
            }
            event = controller.next_event() => {
                controller.handle(event);
            }
            Some(message) = error_rx.recv() => {
                app.report_error(&message);
            }
            _ = redraw.tick() => {}
        }

        app.sync(controller.state());
    }

    Ok(())
}

fn execute_app_command(app: &mut App, controller: &mut ResourceListController, command: AppCommand) {
    match command {
        AppCommand::None => {}
        AppCommand::Refresh => controller.refresh(),
        AppCommand::Invoke { item, kind } => {
            if let Err(rejection) = controller.invoke(item.clone(), kind) {
                app.action_rejected(&item, kind, &rejection);
            }
        }
        AppCommand::SwitchScope(scope) => controller.set_scope(scope),
    }
}

fn compact_error(error: &anyhow::Error) -> String {
    let mut out = Vec::new();
    for (index, cause) in error.chain().enumerate() {
        if index == 0 {
            out.push(cause.to_string());
        } else if index <= 2 {
            out.push(format!("caused by: {cause}"));
        } else {
            break;
        }
    }

    out.join("; ")
}
