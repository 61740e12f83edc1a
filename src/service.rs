//! The service: configuration, middleware chain and routes, assembled in
//! three phases.
//!
//! 1. **Construction.** [`Service::new`] validates the config, picks the
//!    stats sink and installs the standard stages: bottom (request id,
//!    panics, metrics), negotiator, API version.
//! 2. **Extension.** [`add_handler`](Service::add_handler) appends
//!    middleware; resources and routes are added to the router.
//! 3. **Running.** [`seal`](Service::seal) appends the router as the last
//!    stage and returns a [`Pipeline`]. [`run`](Service::run) seals and
//!    serves until shutdown, then closes the stats sink.
//!
//! ```rust,no_run
//! use luddite::{Service, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> luddite::Result<()> {
//!     let config = ServiceConfig::load("luddite.toml")?;
//!     luddite::logging::init(&config.log)?;
//!
//!     let service = Service::new(config)?;
//!     service.run().await
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::codec::{Codec, Codecs};
use crate::config::ServiceConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::handler::{BoxFuture, BoxedHandler, Handler, Next};
use crate::method::Method;
use crate::middleware::{Bottom, Chain, Negotiator, VersionHandler};
use crate::request::Request;
use crate::resource::{register_collection, register_singleton, Resource};
use crate::router::{Endpoint, Router};
use crate::schema;
use crate::server::Server;
use crate::stats::{self, MetricsStats, NullStats, Stats};

/// A REST service under construction.
pub struct Service {
    config: ServiceConfig,
    stats: Arc<dyn Stats>,
    codecs: Codecs,
    handlers: Vec<BoxedHandler>,
    chain: Chain,
    /// `None` once sealed.
    router: Option<Router>,
}

/// The sealed middleware chain, ending in the router.
///
/// Cheap to clone and shared by every connection.
#[derive(Clone)]
pub struct Pipeline {
    chain: Chain,
}

impl Pipeline {
    /// Runs one request through every stage.
    pub fn call(&self, req: Request) -> BoxFuture {
        self.chain.call(Context::new(), req)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").field("stages", &self.chain.len()).finish()
    }
}

/// Options that must be chosen before the standard stages are installed.
pub struct ServiceBuilder {
    config: ServiceConfig,
    stats: Option<Arc<dyn Stats>>,
    codecs: Codecs,
}

impl ServiceBuilder {
    /// Replaces the stats sink chosen from `metrics.enabled`.
    pub fn stats(mut self, stats: impl Stats) -> Self {
        self.stats = Some(Arc::new(stats));
        self
    }

    /// Adds a representation after the built-in ones; JSON stays the default.
    pub fn codec(mut self, codec: impl Codec) -> Self {
        self.codecs = self.codecs.with(codec);
        self
    }

    pub fn build(self) -> Result<Service> {
        let config = self.config;
        config.validate()?;

        let stats = self.stats.unwrap_or_else(|| -> Arc<dyn Stats> {
            if config.metrics.enabled {
                Arc::new(MetricsStats::new(config.metrics.prefix.clone()))
            } else {
                Arc::new(NullStats)
            }
        });

        let handlers: Vec<BoxedHandler> = vec![
            Arc::new(Bottom::new(Arc::clone(&stats))),
            Arc::new(Negotiator::new(self.codecs.clone())),
            Arc::new(VersionHandler::from_config(&config.version)?),
        ];

        let mut service = Service {
            chain: Chain::build(&handlers),
            config,
            stats,
            codecs: self.codecs,
            handlers,
            router: Some(Router::new()),
        };

        if service.config.schema.enabled {
            let schema_config = service.config.schema.clone();
            let max = service.config.version.max;
            schema::register(&mut service, &schema_config, max)?;
        }
        Ok(service)
    }
}

impl Service {
    /// A service with the default stats sink and the built-in codecs.
    pub fn new(config: ServiceConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: ServiceConfig) -> ServiceBuilder {
        ServiceBuilder { config, stats: None, codecs: Codecs::default() }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<dyn Stats> {
        &self.stats
    }

    pub fn codecs(&self) -> &Codecs {
        &self.codecs
    }

    pub fn is_sealed(&self) -> bool {
        self.router.is_none()
    }

    fn router_mut(&mut self) -> Result<&mut Router> {
        self.router.as_mut().ok_or(Error::Sealed)
    }

    /// Appends a middleware stage after every stage added so far.
    pub fn add_handler(&mut self, handler: impl Handler) -> Result<()> {
        if self.is_sealed() {
            return Err(Error::Sealed);
        }
        self.handlers.push(Arc::new(handler));
        self.chain = Chain::build(&self.handlers);
        Ok(())
    }

    /// Binds `GET base`, `PUT base` and `POST base/{action}`.
    pub fn add_singleton_resource<R: Resource>(&mut self, base: &str, resource: R) -> Result<()> {
        register_singleton(self.router_mut()?, base, Arc::new(resource))
    }

    /// Binds list, get, create, update, delete (item and bulk) and
    /// item actions under `base`.
    pub fn add_collection_resource<R: Resource>(&mut self, base: &str, resource: R) -> Result<()> {
        register_collection(self.router_mut()?, base, Arc::new(resource))
    }

    /// Binds a single endpoint. This is how collaborators outside the
    /// resource model (schema files, health checks) add routes.
    pub fn add_route(&mut self, method: Method, path: &str, endpoint: impl Endpoint) -> Result<()> {
        self.router_mut()?.add(method, path, endpoint)
    }

    /// Appends the router as the final stage and freezes the service.
    pub fn seal(&mut self) -> Result<Pipeline> {
        let router = Arc::new(self.router.take().ok_or(Error::Sealed)?);
        let dispatch = move |ctx: Context, req: Request, _next: Next| router.dispatch(ctx, req);
        self.handlers.push(Arc::new(dispatch));
        self.chain = Chain::build(&self.handlers);
        Ok(Pipeline { chain: self.chain.clone() })
    }

    /// Seals the service and serves it on `addr` until shutdown.
    pub async fn run(mut self) -> Result<()> {
        if self.config.metrics.enabled {
            stats::install_exporter(&self.config.metrics)?;
        }

        let pipeline = self.seal()?;

        let mut server = Server::bind(&self.config.addr)?;
        let transport = &self.config.transport;
        if transport.tls {
            server = server.with_tls(&transport.cert_file_path, &transport.key_file_path)?;
        }

        let result = server.serve(pipeline).await;
        self.stats.close();
        info!("service stopped");
        result
    }
}
