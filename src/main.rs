use frostbite_rcon::{client::Client, config::ClientConfig, events::EventSink};
use log::{error, info, LevelFilter, Metadata, Record};
use std::{error::Error, process::ExitCode, time::Duration};

struct SimpleLogger {
    level: LevelFilter,
}

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("{} - {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

fn log_level() -> LevelFilter {
    match std::env::var("RCON_LOG") {
        Ok(level) => level.parse().unwrap_or(LevelFilter::Info),
        Err(_) => LevelFilter::Info,
    }
}

const USAGE: &str = "usage: frostbite-rcon <host:port> <password> [command...]";

async fn run(host: &str, password: &str, commands: &[String]) -> Result<(), Box<dyn Error>> {
    let timeout = Some(Duration::from_secs(5));
    let sink = EventSink::callback(|words| info!("event: {:?}", words));

    let client = Client::connect_with(host, ClientConfig::default(), sink).await?;
    client.start_background_receive(Duration::from_millis(10));

    let login = client.authenticate(password, timeout).await?;
    if !login.is_ok() {
        client.close().await;
        return Err(format!("login refused: {:?}", login.words()).into());
    }
    info!("authenticated with {}", client.peer_addr());

    for command in commands {
        let response = client.invoke(command, timeout).await?;
        println!("{}", response.words().join(" "));
    }

    client.close().await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let level = log_level();
    let logger: &'static SimpleLogger = Box::leak(Box::new(SimpleLogger { level }));
    let _ = log::set_logger(logger).map(|()| log::set_max_level(level));

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (host, password, commands) = match args.as_slice() {
        [host, password] => (host, password, vec![String::from("serverInfo")]),
        [host, password, commands @ ..] => (host, password, commands.to_vec()),
        _ => {
            eprintln!("{}", USAGE);
            return ExitCode::FAILURE;
        }
    };

    match run(host, password, &commands).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
