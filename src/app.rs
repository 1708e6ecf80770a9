//! Top-level application wiring.
//!
//! All components are dependency-injected here and owned by [`App`]; the
//! observers subscribe to the bus before the retriever's first pass so no
//! event is lost at startup.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::consul::ConsulClient;
use crate::disco::Discoverer;
use crate::error::GslbError;
use crate::events::{EventBus, EventKind};
use crate::geoloc::{GeoDb, GeoLoc, MaxmindGeoDb};
use crate::registry::Registry;
use crate::resolver::GslbHandler;
use crate::retriever::Retriever;
use crate::server::DnsServer;

/// The assembled GSLB daemon.
pub struct App {
    cnf: Config,
    bus: Arc<EventBus>,
    registry: Arc<Registry>,
    handler: GslbHandler,
    retriever: Arc<Retriever>,
    discoverer: Arc<Discoverer>,
}

impl App {
    /// Build every component from the configuration. An unreadable geo
    /// database is fatal here, before anything binds.
    pub fn new(cnf: Config) -> Result<Self, GslbError> {
        cnf.validate()?;

        let consul = ConsulClient::new(&cnf.consul_config)?;
        let geo_db: Option<Box<dyn GeoDb>> = match &cnf.geo_loc.geo_db {
            Some(db) => Some(Box::new(MaxmindGeoDb::open(&db.path)?)),
            None => None,
        };
        let geoloc = Arc::new(GeoLoc::new(cnf.geo_loc.dc_positions.clone(), geo_db));
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(Registry::new(geoloc));
        let handler = GslbHandler::new(Arc::clone(&registry), &cnf.dns_server);
        let retriever = Arc::new(Retriever::new(
            consul.clone(),
            Arc::clone(&bus),
            &cnf.consul_config,
            &cnf.dc_name,
        ));
        let discoverer = Arc::new(Discoverer::new(
            consul,
            Arc::clone(&bus),
            &cnf.dc_name,
            &cnf.healthcheck_config.healthcheck_address,
        ));

        Ok(Self {
            cnf,
            bus,
            registry,
            handler,
            retriever,
            discoverer,
        })
    }

    /// Run every component until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), GslbError> {
        info!(dc = %self.cnf.dc_name, "starting gslb-dns");

        let registry_events = self
            .bus
            .catalog_entries
            .subscribe(&[EventKind::Set, EventKind::Delete]);
        let disco_events = self
            .bus
            .kv_entries
            .subscribe(&[EventKind::Set, EventKind::Delete]);

        let registry_task = tokio::spawn(
            Arc::clone(&self.registry).run(registry_events, cancel.clone()),
        );
        let disco_task =
            tokio::spawn(Arc::clone(&self.discoverer).run(disco_events, cancel.clone()));
        let retriever_task = tokio::spawn(Arc::clone(&self.retriever).run(cancel.clone()));

        let dns_server = DnsServer::new(self.cnf.dns_server.clone(), self.handler.clone());
        let result = dns_server.run(cancel.clone()).await;

        // whatever stopped the DNS server takes the rest down too
        cancel.cancel();
        let _ = retriever_task.await;
        let _ = disco_task.await;
        let _ = registry_task.await;

        info!("gslb-dns stopped");
        result
    }
}
