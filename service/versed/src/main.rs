//! `versed`: the reference server binary wiring `verse_core`'s session plane to real TCP sockets
//! via `mio` (§1 Non-goals: the socket plumbing itself; this binary is exactly that plumbing).
mod config;
mod transport;

use clap::{App, Arg};
use config::ServerConfig;
use hashbrown::HashMap;
use mio::net::TcpListener;
use mio::{Events, Poll, PollOpt, Ready, Token};
use slog::{error, info};
use transport::TcpTransport;
use verse_core::fake::TerminateReason;
use verse_core::registry::Registry;
use verse_core::session::ConnectFlags;
use verse_core::stream::StreamLoop;

const SERVER_TOKEN: Token = Token(0);

fn main() {
    let matches = App::new("versed")
        .version("0.1.0")
        .author("Bush Hammer Industries")
        .about("Verse session server")
        .arg(
            Arg::with_name("CONFIG_FILE")
                .long("config")
                .takes_value(true)
                .help("Path to a TOML server configuration file"),
        )
        .get_matches();

    let config = match matches.value_of("CONFIG_FILE") {
        Some(path) => ServerConfig::load(path),
        None => ServerConfig::default(),
    };

    let logger = verse_wire::logging::init(None);
    info!(logger, "starting versed"; "listen_address" => &config.listen_address);

    let addr = config.listen_address.parse().expect("invalid listen address");
    let listener = TcpListener::bind(&addr).expect("failed to bind listener");

    let poll = Poll::new().expect("failed to create mio poll");
    poll.register(&listener, SERVER_TOKEN, Ready::readable(), PollOpt::edge())
        .expect("failed to register listener");

    let mut registry = Registry::new();
    let mut streams: HashMap<Token, StreamLoop<TcpTransport>> = HashMap::new();
    let mut next_token = 1usize;
    let mut events = Events::with_capacity(1024);

    loop {
        poll.poll(&mut events, None).expect("poll failed");

        for event in events.iter() {
            if event.token() == SERVER_TOKEN {
                loop {
                    match listener.accept() {
                        Ok((stream, peer_addr)) => {
                            let token = Token(next_token);
                            next_token += 1;

                            if let Err(err) = poll.register(
                                &stream,
                                token,
                                Ready::readable() | Ready::writable(),
                                PollOpt::edge(),
                            ) {
                                error!(logger, "failed to register connection"; "error" => %err);
                                continue;
                            }

                            let session = match registry.connect(
                                peer_addr.to_string(),
                                "versed".to_string(),
                                ConnectFlags::default(),
                                config.default_fps,
                            ) {
                                Ok(session) => session,
                                Err(err) => {
                                    error!(logger, "connect rejected"; "error" => %err);
                                    continue;
                                }
                            };
                            session.set_in_queue_max_size(config.in_queue_max_size);
                            session.set_out_queue_max_size(config.out_queue_max_size);
                            session.accept(0);

                            let transport = TcpTransport::new(stream);
                            let stream_loop =
                                StreamLoop::new(session, transport, logger.clone(), true);
                            streams.insert(token, stream_loop);
                        }
                        Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                        Err(err) => {
                            error!(logger, "accept failed"; "error" => %err);
                            break;
                        }
                    }
                }
                continue;
            }

            let should_drop = match streams.get_mut(&event.token()) {
                Some(stream_loop) => match stream_loop.tick() {
                    Ok(()) => false,
                    Err(err) if err.is_fatal() => {
                        stream_loop.session.terminate(TerminateReason::Error);
                        true
                    }
                    Err(err) => {
                        error!(logger, "recoverable stream error"; "error" => %err);
                        false
                    }
                },
                None => false,
            };

            if should_drop {
                if let Some(stream_loop) = streams.remove(&event.token()) {
                    registry.remove(stream_loop.session.id);
                }
            }
        }
    }
}
