use crossterm::{
    event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{error::Error, io, sync::Arc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vigil_core::api::BackendClient;
use vigil_dashboard::{config::load_config, render::render_ui, session::DashboardSession};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = load_config()?;
    init_logging(config.log_stdout);

    let client = Arc::new(BackendClient::new(
        config.api_url.clone(),
        config.request_timeout,
    )?);
    info!(event = "dashboard_start", api_url = %config.api_url);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut session = DashboardSession::activate(config.session.clone(), client);
    let result = run(&mut terminal, &mut session).await;
    session.shutdown().await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

async fn run(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    session: &mut DashboardSession,
) -> Result<(), Box<dyn Error>> {
    let mut events = EventStream::new();
    let mut redraw = true;
    loop {
        if redraw {
            terminal.draw(|frame| render_ui(frame, &session.view()))?;
            redraw = false;
        }
        tokio::select! {
            maybe_event = session.recv() => {
                match maybe_event {
                    Some(event) => redraw = session.apply(event),
                    None => break,
                }
            }
            maybe_input = events.next() => {
                match maybe_input {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        if is_quit_key(key) {
                            break;
                        }
                    }
                    Some(Ok(Event::Resize(_, _))) => redraw = true,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(event = "terminal_input_error", error = %err);
                        break;
                    }
                    None => break,
                }
            }
        }
    }
    Ok(())
}

fn is_quit_key(key: KeyEvent) -> bool {
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => true,
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

fn init_logging(stdout_enabled: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if stdout_enabled {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::sink)
            .try_init();
    }
}
