// Connection supervisor
// Keeps the shared player connection alive and replaces it once it is lost

use super::{Connector, PlayerConnection, SharedConnection};
use backoff::backoff::{Backoff, Constant};
use std::time::Duration;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const PING_INTERVAL: Duration = Duration::from_secs(30);
pub const CHECK_INTERVAL: Duration = Duration::from_secs(1);
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

pub struct Supervisor<C: Connector> {
    connector: C,
    connection: SharedConnection<C::Connection>,
    ping_interval: Duration,
    check_interval: Duration,
    backoff: Constant,
}

impl<C: Connector> Supervisor<C> {
    pub fn new(connector: C, connection: SharedConnection<C::Connection>) -> Self {
        Self {
            connector,
            connection,
            ping_interval: PING_INTERVAL,
            check_interval: CHECK_INTERVAL,
            backoff: Constant::new(RECONNECT_BACKOFF),
        }
    }

    pub fn with_intervals(
        mut self,
        ping: Duration,
        check: Duration,
        reconnect_backoff: Duration,
    ) -> Self {
        self.ping_interval = ping;
        self.check_interval = check;
        self.backoff = Constant::new(reconnect_backoff);
        self
    }

    /// Run until `shutdown` is cancelled
    pub async fn run(mut self, shutdown: CancellationToken) {
        let start = Instant::now();
        let mut ping = interval_at(start + self.ping_interval, self.ping_interval);
        let mut check = interval_at(start + self.check_interval, self.check_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ping.tick() => self.ping().await,
                _ = check.tick() => {
                    if self.reconnect_if_closed().await {
                        continue;
                    }
                    let delay = self.backoff.next_backoff().unwrap_or(RECONNECT_BACKOFF);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(delay) => {}
                    }
                }
            }
        }

        log::debug!("Connection supervisor stopped");
    }

    async fn ping(&self) {
        let mut conn = self.connection.lock().await;
        if conn.is_closed() {
            return;
        }
        if let Err(e) = conn.ping().await {
            log::warn!("Ping failed: {:#}", e);
        }
    }

    /// Replace the connection if it was lost.
    /// Returns false only when a reconnect was needed and failed.
    async fn reconnect_if_closed(&mut self) -> bool {
        let closed = self.connection.lock().await.is_closed();
        if !closed {
            return true;
        }

        log::info!("Detected closed player connection, reconnecting");
        let fresh = match self.connector.connect().await {
            Ok(fresh) => fresh,
            Err(e) => {
                log::warn!("Reconnection failed: {:#}", e);
                return false;
            }
        };

        let mut conn = self.connection.lock().await;
        let mut old = std::mem::replace(&mut *conn, fresh);
        if let Err(e) = old.close().await {
            log::debug!("Closing the old connection failed: {:#}", e);
        }
        drop(conn);

        self.backoff.reset();
        log::info!("Successfully reconnected");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::{Song, Status};
    use anyhow::Result;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    struct FakeConnection {
        id: usize,
        closed: Arc<AtomicBool>,
        close_calls: Arc<AtomicUsize>,
    }

    impl PlayerConnection for FakeConnection {
        async fn status(&mut self) -> Result<Status> {
            Ok(Status::default())
        }

        async fn play_time(&mut self) -> Result<u64> {
            Ok(0)
        }

        async fn current_song(&mut self) -> Result<Song> {
            Ok(Song::default())
        }

        async fn ping(&mut self) -> Result<()> {
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    struct FakeConnector {
        attempts: Arc<AtomicUsize>,
        fail_first: usize,
        close_calls: Arc<AtomicUsize>,
    }

    impl Connector for FakeConnector {
        type Connection = FakeConnection;

        async fn connect(&self) -> Result<FakeConnection> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.fail_first {
                anyhow::bail!("connection refused");
            }
            Ok(FakeConnection {
                id: attempt,
                closed: Arc::new(AtomicBool::new(false)),
                close_calls: Arc::clone(&self.close_calls),
            })
        }
    }

    fn initial(closed: bool, close_calls: &Arc<AtomicUsize>) -> SharedConnection<FakeConnection> {
        Arc::new(Mutex::new(FakeConnection {
            id: 0,
            closed: Arc::new(AtomicBool::new(closed)),
            close_calls: Arc::clone(close_calls),
        }))
    }

    #[tokio::test]
    async fn replaces_a_closed_connection_and_closes_the_old_one() {
        let close_calls = Arc::new(AtomicUsize::new(0));
        let attempts = Arc::new(AtomicUsize::new(0));
        let connection = initial(true, &close_calls);
        let connector = FakeConnector {
            attempts: Arc::clone(&attempts),
            fail_first: 0,
            close_calls: Arc::clone(&close_calls),
        };

        let mut supervisor = Supervisor::new(connector, Arc::clone(&connection));
        assert!(supervisor.reconnect_if_closed().await);

        assert_eq!(connection.lock().await.id, 1);
        assert_eq!(close_calls.load(Ordering::SeqCst), 1);

        // Healthy connection: nothing to do
        assert!(supervisor.reconnect_if_closed().await);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn keeps_the_old_handle_when_reconnecting_fails() {
        let close_calls = Arc::new(AtomicUsize::new(0));
        let connection = initial(true, &close_calls);
        let connector = FakeConnector {
            attempts: Arc::new(AtomicUsize::new(0)),
            fail_first: 1,
            close_calls: Arc::clone(&close_calls),
        };

        let mut supervisor = Supervisor::new(connector, Arc::clone(&connection));
        assert!(!supervisor.reconnect_if_closed().await);
        assert_eq!(connection.lock().await.id, 0);
        assert_eq!(close_calls.load(Ordering::SeqCst), 0);

        assert!(supervisor.reconnect_if_closed().await);
        assert_eq!(connection.lock().await.id, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn run_reconnects_in_the_background_and_stops_on_shutdown() {
        let close_calls = Arc::new(AtomicUsize::new(0));
        let connection = initial(true, &close_calls);
        let connector = FakeConnector {
            attempts: Arc::new(AtomicUsize::new(0)),
            fail_first: 2,
            close_calls: Arc::clone(&close_calls),
        };

        let shutdown = CancellationToken::new();
        let supervisor = Supervisor::new(connector, Arc::clone(&connection)).with_intervals(
            Duration::from_secs(30),
            Duration::from_secs(1),
            Duration::from_secs(5),
        );
        let task = tokio::spawn(supervisor.run(shutdown.clone()));

        // Two failed attempts with backoff, then success
        sleep(Duration::from_secs(20)).await;
        assert_eq!(connection.lock().await.id, 3);

        shutdown.cancel();
        task.await.unwrap();
    }
}
