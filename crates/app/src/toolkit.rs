//! Headless stand-in for a windowing toolkit.
//!
//! Ticks the handler at a fixed period against a [`RecordingCanvas`] and
//! turns lines typed on stdin into key, pointer and resize events.

use std::{
    collections::HashSet,
    io::BufRead,
    sync::mpsc,
    thread,
    time::{Duration, Instant},
};

use pcmscope_core::{Control, EventHandler, RecordingCanvas};

const STATS_EVERY_TICKS: u64 = 100;

/// Input event delivered to the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolkitEvent {
    Key { key: char, pressed: bool },
    Button { button: u32, x: i32, y: i32, pressed: bool },
    Resize { width: i32, height: i32 },
}

/// Turns typed commands into events. Tone keys have no release on a line
/// based terminal, so each mention toggles between press and release.
#[derive(Debug, Default)]
pub struct KeyLatch {
    held: HashSet<char>,
}

impl KeyLatch {
    pub fn parse(&mut self, line: &str) -> Vec<ToolkitEvent> {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Vec::new();
        };
        let numbers: Vec<i32> = words.filter_map(|w| w.parse().ok()).collect();

        match (command, numbers.as_slice()) {
            ("q" | "quit", _) => vec![ToolkitEvent::Key {
                key: 'q',
                pressed: true,
            }],
            ("p" | "pause", _) => vec![
                ToolkitEvent::Key {
                    key: ' ',
                    pressed: true,
                },
                ToolkitEvent::Key {
                    key: ' ',
                    pressed: false,
                },
            ],
            ("click", [x, y]) => vec![
                ToolkitEvent::Button {
                    button: 1,
                    x: *x,
                    y: *y,
                    pressed: true,
                },
                ToolkitEvent::Button {
                    button: 1,
                    x: *x,
                    y: *y,
                    pressed: false,
                },
            ],
            ("resize", [width, height]) => vec![ToolkitEvent::Resize {
                width: *width,
                height: *height,
            }],
            (keys, []) if keys.chars().all(|c| c.is_ascii_digit() || c == '-') => keys
                .chars()
                .map(|key| {
                    let pressed = self.held.insert(key);
                    if !pressed {
                        self.held.remove(&key);
                    }
                    ToolkitEvent::Key { key, pressed }
                })
                .collect(),
            _ => {
                tracing::warn!(line, "unrecognised command");
                Vec::new()
            }
        }
    }
}

/// Reads stdin lines on a background thread.
pub fn spawn_stdin_reader() -> std::io::Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("stdin-events".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

pub struct HeadlessToolkit {
    canvas: RecordingCanvas,
    latch: KeyLatch,
}

impl HeadlessToolkit {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            canvas: RecordingCanvas::new(width, height),
            latch: KeyLatch::default(),
        }
    }

    /// Runs until the handler asks to quit.
    pub fn run(
        &mut self,
        handler: &mut dyn EventHandler,
        period: Duration,
        lines: &mpsc::Receiver<String>,
    ) {
        let mut next_tick = Instant::now();
        let mut ticks: u64 = 0;
        let mut ops: usize = 0;

        loop {
            while let Ok(line) = lines.try_recv() {
                for event in self.latch.parse(&line) {
                    if self.dispatch(handler, event) == Control::Quit {
                        tracing::info!(ticks, "quit requested");
                        return;
                    }
                }
            }

            if handler.update(&mut self.canvas) == Control::Quit {
                return;
            }
            ops += self.canvas.take_ops().len();
            ticks += 1;
            if ticks % STATS_EVERY_TICKS == 0 {
                tracing::debug!(ticks, ops, "draw calls recorded");
            }

            next_tick += period;
            let now = Instant::now();
            if next_tick > now {
                thread::sleep(next_tick - now);
            } else {
                next_tick = now;
            }
        }
    }

    fn dispatch(&mut self, handler: &mut dyn EventHandler, event: ToolkitEvent) -> Control {
        match event {
            ToolkitEvent::Key { key, pressed } => handler.key(key, pressed),
            ToolkitEvent::Button {
                button,
                x,
                y,
                pressed,
            } => handler.button(button, x, y, pressed),
            ToolkitEvent::Resize { width, height } => {
                self.canvas.resize(width, height);
                handler.resize(width, height);
                Control::Continue
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tone_keys_toggle() {
        let mut latch = KeyLatch::default();

        assert_eq!(
            latch.parse("4"),
            vec![ToolkitEvent::Key {
                key: '4',
                pressed: true
            }]
        );
        assert_eq!(
            latch.parse("4-"),
            vec![
                ToolkitEvent::Key {
                    key: '4',
                    pressed: false
                },
                ToolkitEvent::Key {
                    key: '-',
                    pressed: true
                },
            ]
        );
    }

    #[test]
    fn pointer_and_control_commands() {
        let mut latch = KeyLatch::default();

        assert_eq!(latch.parse("click 10 20").len(), 2);
        assert_eq!(
            latch.parse("resize 640 480"),
            vec![ToolkitEvent::Resize {
                width: 640,
                height: 480
            }]
        );
        assert_eq!(
            latch.parse("q"),
            vec![ToolkitEvent::Key {
                key: 'q',
                pressed: true
            }]
        );
        assert!(latch.parse("click 10").is_empty());
        assert!(latch.parse("   ").is_empty());
    }
}
