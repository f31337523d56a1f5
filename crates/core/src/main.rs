use std::io::{self, Write};
use std::sync::Arc;

use percept_core::config::PerceptCfg;
use percept_core::io::input::CommandSender;
use percept_core::io::output::{OutputKind, OutputMessage, OutputReceiver};
use percept_core::runtime::Runtime;
use percept_core::sensory::dispatcher::LineDispatcher;
use percept_core::sensory::sensors::{DistanceSensor, SensorHub, TempSensor, TimeSensor};
use percept_llm::http::HttpBackend;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Arc::new(PerceptCfg::from_env());

    // Tracing goes to a file; stdout belongs to the console.
    std::fs::create_dir_all(&cfg.log_dir)?;
    let file = std::fs::File::create(cfg.log_dir.join("session.log"))?;
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json().with_target(true).with_writer(file))
        .init();

    for (key, value, _) in cfg.to_entries() {
        tracing::info!(key, value = %value, "config");
    }

    let backend = Arc::new(HttpBackend::new(Some(cfg.llm_base_url.clone())));

    let temp = Arc::new(TempSensor::new());
    let distance = Arc::new(DistanceSensor::new());
    let mut hub = SensorHub::new();
    hub.register(Arc::new(TimeSensor::new()));
    hub.register(temp.clone());
    hub.register(distance.clone());
    let mut dispatcher = LineDispatcher::new();
    dispatcher.register(temp);
    dispatcher.register(distance);

    let (mut runtime, command_tx, output_rx) = Runtime::new(Arc::clone(&cfg), backend, Arc::new(hub));
    let token = runtime.token();
    runtime.listen_for_signals();

    if let Some(path) = &cfg.sensor_path {
        match tokio::fs::File::open(path).await {
            Ok(file) => {
                tracing::info!(path = %path.display(), "reading sensor lines");
                let reader = tokio::io::BufReader::new(file);
                let feed = dispatcher.spawn_logged(reader, token.child_token());
                runtime.track("dispatcher", feed);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "sensor source unavailable");
                println!("[Main] Sensor source {} unavailable: {e}", path.display());
            }
        }
    }

    let runtime_fut = runtime.run();
    let repl_fut = run_repl(command_tx, output_rx, token.clone());
    tokio::pin!(runtime_fut);
    tokio::pin!(repl_fut);

    tokio::select! {
        report = &mut runtime_fut => {
            tracing::info!(cycles = report.cycles, "session finished");
            (&mut repl_fut).await
        }
        result = &mut repl_fut => {
            token.cancel();
            (&mut runtime_fut).await;
            result
        }
    }
}

async fn run_repl(
    command_tx: CommandSender,
    mut output_rx: OutputReceiver,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<InputEvent>();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<()>();
    spawn_input_thread(line_tx, ready_rx);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            line = line_rx.recv() => {
                let Some(line) = line else {
                    break;
                };
                match line {
                    InputEvent::Line(line) => {
                        if command_tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    InputEvent::Interrupted => {
                        token.cancel();
                        break;
                    }
                    InputEvent::Eof => break,
                    InputEvent::Error(err) => {
                        eprintln!("input error: {err}");
                        break;
                    }
                }
            }
            msg = output_rx.recv() => {
                let Some(msg) = msg else {
                    break;
                };
                if render(&msg)? {
                    let _ = ready_tx.send(());
                }
            }
        }
    }
    drop(ready_tx);

    // flush whatever the runtime emitted while stopping
    while let Ok(msg) = output_rx.try_recv() {
        render(&msg)?;
    }
    println!();
    Ok(())
}

/// Print one runtime message. Returns true when the console should prompt.
fn render(msg: &OutputMessage) -> anyhow::Result<bool> {
    match msg.kind {
        OutputKind::Token => {
            print!("{}", msg.content);
            io::stdout().flush()?;
            Ok(false)
        }
        OutputKind::Line => {
            println!("{}", msg.content);
            Ok(false)
        }
        OutputKind::Prompt => {
            println!("\n[Main] {}", msg.content);
            Ok(true)
        }
    }
}

fn spawn_input_thread(
    line_tx: mpsc::UnboundedSender<InputEvent>,
    ready_rx: std::sync::mpsc::Receiver<()>,
) {
    std::thread::spawn(move || {
        let mut editor = match rustyline::DefaultEditor::new() {
            Ok(editor) => editor,
            Err(e) => {
                let _ = line_tx.send(InputEvent::Error(e.to_string()));
                return;
            }
        };

        while ready_rx.recv().is_ok() {
            match editor.readline("> ") {
                Ok(line) => {
                    let _ = editor.add_history_entry(line.as_str());
                    if line_tx.send(InputEvent::Line(line)).is_err() {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    let _ = line_tx.send(InputEvent::Interrupted);
                    break;
                }
                Err(ReadlineError::Eof) => {
                    let _ = line_tx.send(InputEvent::Eof);
                    break;
                }
                Err(e) => {
                    let _ = line_tx.send(InputEvent::Error(e.to_string()));
                    break;
                }
            }
        }
    });
}

enum InputEvent {
    Line(String),
    Interrupted,
    Eof,
    Error(String),
}
