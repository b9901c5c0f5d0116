//! Loopback accept server.
//!
//! Forked before the workers, it owns the peer end of every pooled and
//! ad-hoc socket so those descriptors stay connected for the whole
//! run. The ephemeral port is published through the shared state for
//! the resource side to connect to.

use harrow_core::context::Region;
use std::collections::VecDeque;
use std::io;
use std::net::TcpListener;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Peer ends held open at once; the oldest is dropped past this.
const MAX_HELD: usize = 256;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub fn sockserv_main(region: &Region) -> ! {
    match serve(region) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            log::warn!("sockserv: {}", e);
            std::process::exit(1);
        }
    }
}

fn serve(region: &Region) -> io::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    listener.set_nonblocking(true)?;
    region
        .state
        .sockserv_port
        .store(port as u32, Ordering::Release);
    log::info!("sockserv: listening on 127.0.0.1:{}", port);

    let mut held: VecDeque<std::net::TcpStream> = VecDeque::with_capacity(MAX_HELD);
    loop {
        if region.state.stop_requested() {
            return Ok(());
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if held.len() == MAX_HELD {
                    held.pop_front();
                }
                held.push_back(stream);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(POLL_INTERVAL);
            }
            // transient accept errors are not fatal to the run
            Err(e) => log::warn!("sockserv: accept: {}", e),
        }
    }
}
