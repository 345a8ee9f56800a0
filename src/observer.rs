//! Observer side of a build: applies the worker's events to an [`OpsView`]
//! and draws it on stderr.

use std::io;

use console::Term;
use optrace::{Event, OpsView};

use crate::ui;

enum Mode {
    /// Redraw the whole tree in place
    Live { drawn: usize },
    /// One line per event; used for pipes and logs
    Plain,
}

pub struct Observer {
    view: OpsView,
    term: Term,
    mode: Mode,
    max_log_lines: usize,
}

impl Observer {
    /// Falls back to plain output when stderr is not a terminal.
    pub fn new(plain: bool, max_log_lines: usize) -> Self {
        let term = Term::stderr();
        let mode = if plain || !term.is_term() {
            Mode::Plain
        } else {
            Mode::Live { drawn: 0 }
        };
        Self {
            view: OpsView::new(),
            term,
            mode,
            max_log_lines,
        }
    }

    pub fn view(&self) -> &OpsView {
        &self.view
    }

    pub fn apply(&mut self, event: Event) -> io::Result<()> {
        if let Event::Debug { message, .. } = &event {
            log::debug!("worker: {message}");
        }

        match self.mode {
            Mode::Plain => {
                let applied = event.clone();
                if self.view.apply(event)
                    && let Some(line) = ui::plain_line(&self.view, &applied)
                {
                    self.term.write_line(&line)?;
                }
            }
            Mode::Live { .. } => {
                self.view.apply(event);
            }
        }
        Ok(())
    }

    /// Redraw the live tree; a no-op in plain mode.
    pub fn redraw(&mut self) -> io::Result<()> {
        let Mode::Live { drawn } = &mut self.mode else {
            return Ok(());
        };

        let (rows, cols) = self.term.size();
        let lines = fit_lines(
            ui::render_tree(&self.view, self.max_log_lines),
            usize::from(rows).saturating_sub(1),
            usize::from(cols),
        );

        self.term.clear_last_lines(*drawn)?;
        for line in &lines {
            self.term.write_line(line)?;
        }
        *drawn = lines.len();
        Ok(())
    }

    /// Final draw; the tree stays on screen.
    pub fn finish(&mut self) -> io::Result<()> {
        self.redraw()?;
        if let Mode::Live { drawn } = &mut self.mode {
            *drawn = 0;
        }
        Ok(())
    }
}

/// Keep the last `rows` lines, each cut to `cols` columns.
fn fit_lines(lines: Vec<String>, rows: usize, cols: usize) -> Vec<String> {
    let skip = lines.len().saturating_sub(rows.max(1));
    lines
        .into_iter()
        .skip(skip)
        .map(|line| console::truncate_str(&line, cols.max(1), "…").into_owned())
        .collect()
}
