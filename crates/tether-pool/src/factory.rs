//! Opening physical connections and wrapping them as guarded handles.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tether_driver::{Driver, DriverError};
use tokio::sync::mpsc::UnboundedSender;

use crate::config::Configuration;
use crate::error::{PoolError, PoolResult};
use crate::guard::GuardedConnection;
use crate::listener::Notifier;
use crate::owner::{Owner, OwnerId};

/// Opens new physical connections from a resolved driver and an immutable
/// [`Configuration`].
pub struct ConnectionFactory {
    driver: Arc<dyn Driver>,
    config: Arc<Configuration>,
    notifier: Notifier,
    opened: AtomicU64,
}

impl ConnectionFactory {
    pub(crate) fn new(driver: Arc<dyn Driver>, config: Arc<Configuration>, notifier: Notifier) -> Self {
        Self {
            driver,
            config,
            notifier,
            opened: AtomicU64::new(0),
        }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    /// Handles opened so far.
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    /// Open a connection for `owner` and wrap it.
    ///
    /// `reclaim` is the registry's reclamation queue; the owner will report
    /// itself there when it is dropped.
    pub(crate) fn open(
        &self,
        owner: &Owner,
        reclaim: &UnboundedSender<OwnerId>,
    ) -> PoolResult<Arc<GuardedConnection>> {
        let url = self.config.url();
        if !self.driver.accepts_url(url) {
            return Err(PoolError::connection(
                url,
                DriverError::UnsupportedUrl {
                    driver: self.driver.name().to_string(),
                    url: url.to_string(),
                },
            ));
        }

        let properties = self.config.connect_properties();
        let raw = self
            .driver
            .connect(url, &properties)
            .map_err(|e| PoolError::connection(url, e))?;

        let metadata = match raw.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                if let Err(close_err) = raw.close() {
                    tracing::debug!(url, error = %close_err, "close after failed metadata read");
                }
                return Err(PoolError::connection(url, e));
            }
        };

        let id = self.opened.fetch_add(1, Ordering::Relaxed) + 1;
        let description = format!("#{id} {url} [{}]", owner.name());
        let handle = Arc::new(GuardedConnection::new(
            id,
            raw,
            metadata.supports_transactions,
            description,
        ));
        owner.watch(reclaim);

        tracing::debug!(
            connection = %handle,
            owner = %owner.id(),
            product = %metadata.product_name,
            version = %metadata.product_version,
            transactions = metadata.supports_transactions,
            "opened connection"
        );
        self.notifier
            .properties_applied(&format!("{handle} {properties}"));
        self.notifier.connection_opened(handle.description());
        Ok(handle)
    }
}

impl fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("driver", &self.driver.name())
            .field("config", &self.config)
            .field("opened", &self.opened())
            .finish_non_exhaustive()
    }
}
