use anyhow::Context;
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tradelink::core::config::ConfigError;
use tradelink::exchanges::deribit::{self, OrderRequest};
use tradelink::utils::console::{self, Command};
use tradelink::{BlockingQueue, RpcMessage, RpcRequest, Session, SessionConfig};

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_config() -> anyhow::Result<SessionConfig> {
    #[cfg(feature = "env-file")]
    let loaded = SessionConfig::from_env_auto(deribit::ENV_PREFIX);
    #[cfg(not(feature = "env-file"))]
    let loaded = SessionConfig::from_env(deribit::ENV_PREFIX);

    match loaded {
        Ok(config) => Ok(config),
        Err(ConfigError::MissingEnvironmentVariable(var)) => {
            warn!(%var, "Credentials not configured, 'auth' will be rejected by the server");
            Ok(SessionConfig::default())
        }
        Err(e) => Err(e).context("loading configuration"),
    }
}

/// Print everything arriving on `queue` until `running` clears
fn spawn_printer(
    name: &'static str,
    queue: Arc<BlockingQueue<RpcMessage>>,
    running: Arc<AtomicBool>,
    render: fn(&RpcMessage) -> String,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new().name(name.to_string()).spawn(move || {
        while running.load(Ordering::Acquire) {
            if let Some(message) = queue.wait_and_pop_timeout(POLL_INTERVAL) {
                println!("{}", render(&message));
            }
        }
    })
}

fn render_feed(message: &RpcMessage) -> String {
    match (message.channel(), message.data()) {
        (Some(channel), Some(data)) => format!("[{}] {}", channel, data),
        _ => message.to_string(),
    }
}

fn render_reply(message: &RpcMessage) -> String {
    if let Some(error) = message.error() {
        return format!("Error {}: {}", error.code, error.message);
    }
    serde_json::to_string_pretty(message.as_value()).unwrap_or_else(|_| message.to_string())
}

enum Flow {
    Continue,
    Exit,
}

/// Interactive command state: at most one live session
struct Console {
    config: SessionConfig,
    handle: Handle,
    feed: Arc<BlockingQueue<RpcMessage>>,
    inbox: Arc<BlockingQueue<RpcMessage>>,
    session: Option<Session>,
}

impl Console {
    fn execute(&mut self, command: Command) -> anyhow::Result<Flow> {
        match command {
            Command::Help => println!("{}", console::help_text()),
            Command::Connect { host, port, path } => self.connect(host, port, path)?,
            Command::Auth => {
                let session = self.session()?;
                if session.is_authenticated() {
                    println!("Already authenticated.");
                } else {
                    session.send_request(&deribit::auth_request(&self.config))?;
                    println!("Authentication request sent.");
                }
            }
            Command::Place(args) => {
                let request = OrderRequest::from(args).into_request()?;
                self.send_authenticated(&request)?;
                println!("Placed order request sent.");
            }
            Command::Cancel { order_id } => {
                self.send_authenticated(&deribit::cancel_request(&order_id)?)?;
                println!("Cancel request sent.");
            }
            Command::GetOrderBook {
                instrument_name,
                depth,
            } => {
                let request = deribit::order_book_request(&instrument_name, depth)?;
                self.session()?.send_request(&request)?;
            }
            Command::Subscribe {
                channels,
                instruments,
                interval,
            } => {
                let names =
                    console::subscription_channels(&channels, &instruments, interval.as_deref());
                self.send_authenticated(&deribit::subscribe_request(&names)?)?;
                println!("Subscribing to {}.", names.join(", "));
            }
            Command::UnsubscribeAll => {
                self.send_authenticated(&deribit::unsubscribe_all_request())?;
                self.session()?.clear_channels();
                println!("Unsubscribe request sent.");
            }
            Command::Status => self.status(),
            Command::Close => match self.session.take() {
                Some(session) => {
                    session.close();
                    println!("Session closed.");
                }
                None => println!("No active session."),
            },
            Command::Exit => {
                if let Some(session) = self.session.take() {
                    session.close();
                }
                println!("Exiting the program...");
                return Ok(Flow::Exit);
            }
        }
        Ok(Flow::Continue)
    }

    fn connect(
        &mut self,
        host: Option<String>,
        port: Option<String>,
        path: Option<String>,
    ) -> anyhow::Result<()> {
        if self.session.as_ref().is_some_and(|s| !s.state().is_terminal()) {
            println!("Already connected. Please close the session before reconnecting.");
            return Ok(());
        }

        let overridden = host.is_some() || port.is_some() || path.is_some();
        let host = host.unwrap_or_else(|| self.config.host.clone());
        let port = port.unwrap_or_else(|| self.config.port.clone());
        let path = path.unwrap_or_else(|| self.config.path.clone());

        let session = Session::new(
            self.config.clone(),
            self.handle.clone(),
            Arc::clone(&self.feed),
            Arc::clone(&self.inbox),
        );
        if overridden {
            session.run(&host, &port, &path)?;
        } else {
            session.run_default()?;
        }

        // Written as soon as the handshake completes
        if self.config.has_credentials() {
            session.send_request(&deribit::auth_request(&self.config))?;
        } else {
            println!("No credentials configured, connected unauthenticated.");
        }

        println!("Connecting to {}:{}{}", host, port, path);
        self.session = Some(session);
        Ok(())
    }

    fn session(&self) -> anyhow::Result<&Session> {
        self.session
            .as_ref()
            .context("No active session, run 'connect' first")
    }

    fn send_authenticated(&self, request: &RpcRequest) -> anyhow::Result<()> {
        let session = self.session()?;
        session.require_token()?;
        session.send_request(request)?;
        Ok(())
    }

    fn status(&self) {
        let Some(session) = &self.session else {
            println!("No active session.");
            return;
        };
        let stats = session.stats();
        println!("State:          {}", session.state());
        println!("Authenticated:  {}", session.is_authenticated());
        println!(
            "Sent:           {} messages, {} bytes, {} failed",
            stats.messages_sent, stats.bytes_sent, stats.write_failures
        );
        println!(
            "Received:       {} messages, {} bytes, {} unparseable",
            stats.messages_received, stats.bytes_received, stats.parse_failures
        );
        println!(
            "Routed:         {} feed, {} inbox",
            stats.feed_messages, stats.inbox_messages
        );
        if let Some(failure) = session.failure() {
            println!("Failure:        {}", failure);
        }
        for (channel, data) in session.channels() {
            println!("Last seen:      [{}] {}", channel, data);
        }
    }
}

/// Read stdin on its own thread so the prompt loop can notice Ctrl-C
fn spawn_stdin_reader() -> io::Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new().name("stdin".to_string()).spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    })?;
    Ok(rx)
}

fn prompt() {
    print!("> ");
    if let Err(e) = io::stdout().flush() {
        warn!(error = %e, "Failed to flush stdout");
    }
}

fn run_console(
    runtime: &Runtime,
    config: SessionConfig,
    running: &Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let feed = Arc::new(BlockingQueue::new());
    let inbox = Arc::new(BlockingQueue::new());

    let printers = [
        spawn_printer("feed", Arc::clone(&feed), Arc::clone(running), render_feed)?,
        spawn_printer("inbox", Arc::clone(&inbox), Arc::clone(running), render_reply)?,
    ];

    let mut console = Console {
        config,
        handle: runtime.handle().clone(),
        feed,
        inbox,
        session: None,
    };
    let lines = spawn_stdin_reader()?;

    println!("Welcome to the interactive CLI program! Type 'help' for options.");
    prompt();
    while running.load(Ordering::Acquire) {
        let line = match lines.recv_timeout(POLL_INTERVAL) {
            Ok(line) => line,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };

        let flow = match console::parse_line(&line) {
            Ok(None) => Flow::Continue,
            Ok(Some(command)) => console.execute(command).unwrap_or_else(|e| {
                println!("Error: {:#}", e);
                Flow::Continue
            }),
            Err(e) => {
                if e.print().is_err() {
                    println!("{}", e);
                }
                Flow::Continue
            }
        };
        if matches!(flow, Flow::Exit) {
            break;
        }
        prompt();
    }

    running.store(false, Ordering::Release);
    if let Some(session) = console.session.take() {
        session.close();
    }
    join_printers(printers);
    Ok(())
}

/// Join printer threads, logging any that panicked. Returns how many did.
fn join_printers(printers: impl IntoIterator<Item = JoinHandle<()>>) -> usize {
    let mut panicked = 0;
    for printer in printers {
        let name = printer.thread().name().unwrap_or("printer").to_string();
        if printer.join().is_err() {
            warn!(thread = %name, "Printer thread panicked");
            panicked += 1;
        }
    }
    panicked
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let config = load_config()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .thread_name("tradelink-io")
        .enable_all()
        .build()
        .context("starting the I/O runtime")?;

    let running = Arc::new(AtomicBool::new(true));
    let on_signal = Arc::clone(&running);
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Signal received, stopping");
            on_signal.store(false, Ordering::Release);
        }
    });

    let result = run_console(&runtime, config, &running);

    // In-flight operations are abandoned, not drained
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}
