pub mod conversation;

use crate::config::ConfigSource;
use crate::events::PanelEvent;
use crate::session::PanelSession;
use anyhow::Result;
use conversation::{ConversationAction, ConversationManager};
use crossterm::{
    event::{self, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io::{self, Stdout};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Run the chat panel until the user leaves it
pub async fn run_panel(
    session: Arc<PanelSession>,
    events: mpsc::UnboundedReceiver<PanelEvent>,
    config_source: ConfigSource,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_loop(&mut terminal, session, events, config_source).await;

    // Restore the terminal even when the loop failed
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    session: Arc<PanelSession>,
    mut events: mpsc::UnboundedReceiver<PanelEvent>,
    config_source: ConfigSource,
) -> Result<()> {
    let mut manager = ConversationManager::new(session.clone(), config_source);
    session.resolve_view();

    loop {
        // Outcomes are taken before draining so every delta of a finished
        // submission lands before its message is moved into the transcript
        let finished = manager.take_finished();
        while let Ok(event) = events.try_recv() {
            manager.apply_event(event);
        }
        for outcome in finished {
            manager.finish_submission(outcome);
        }

        terminal.draw(|frame| manager.render(frame))?;

        if event::poll(POLL_INTERVAL)? {
            if let Event::Key(key) = event::read()? {
                if manager.handle_key(key).await == ConversationAction::Exit {
                    return Ok(());
                }
            }
        } else {
            tokio::task::yield_now().await;
        }
    }
}
