// SPDX-License-Identifier: Apache-2.0

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::{BoundedReceiver, bounded};
use crate::exporters::lumberjack::{
    Publisher, PublisherConfig, TlsConnector, init_crypto_provider,
};
use crate::init::args::AgentRun;
use crate::init::config::Config;
use crate::init::wait;
use crate::receivers::file::control::{Control, Routes};
use crate::receivers::file::harvester::HarvesterContext;
use crate::receivers::file::persistence::{Progress, ProgressStore};
use crate::receivers::file::prospector::Prospector;
use crate::receivers::file::registrar::Registrar;
use crate::receivers::file::registry::Registry;
use crate::receivers::file::watcher::{self, RotationWatcher, create_watcher};
use crate::topology::payload::{EventPage, FileEvent};
use crate::topology::spooler::Spooler;

const EVENT_QUEUE_SIZE: usize = 16;
const PAGE_QUEUE_SIZE: usize = 1;
const ACKED_QUEUE_SIZE: usize = 1;
const WATCH_QUEUE_SIZE: usize = 64;

pub struct Agent {
    args: AgentRun,
    config: Config,
    ctx: HarvesterContext,
    routes: Routes,
    watch_rx: BoundedReceiver<PathBuf>,
    /// Spooler inputs, in the order of `config.network`.
    group_events: Vec<BoundedReceiver<FileEvent>>,
}

impl Agent {
    pub fn new(args: AgentRun, config: Config) -> Self {
        let registry = Arc::new(Registry::new());
        let (watch_tx, watch_rx) = bounded(WATCH_QUEUE_SIZE);
        let ctx = HarvesterContext::new(registry, args.harvester_config(), Some(watch_tx));

        let mut routes = Routes::new();
        let mut group_events = Vec::with_capacity(config.network.len());
        for group in &config.network {
            let (events_tx, events_rx) = bounded::<FileEvent>(EVENT_QUEUE_SIZE);
            routes.add_group(group.name.clone(), events_tx);
            group_events.push(events_rx);
        }
        for file_group in &config.files {
            for path in &file_group.group.paths {
                routes.add_path(path, file_group.dest.clone());
            }
        }

        Self {
            args,
            config,
            ctx,
            routes,
            watch_rx,
            group_events,
        }
    }

    /// Operational commands against this agent's harvesters.
    pub fn control(&self) -> Control {
        Control::new(self.ctx.clone(), self.routes.clone())
    }

    pub async fn run(
        self,
        agent_cancel: CancellationToken,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let Agent {
            args,
            config,
            ctx,
            routes,
            watch_rx,
            group_events,
        } = self;

        info!(
            network_groups = config.network.len(),
            file_groups = config.files.len(),
            "Starting logship."
        );

        init_crypto_provider()?;

        // Anything that can be rejected is built before the first task starts
        let mut connectors = Vec::with_capacity(config.network.len());
        for group in &config.network {
            let tls = group
                .tls_config()
                .map_err(|e| format!("network group {}: {}", group.name, e))?;
            connectors.push(TlsConnector::new(tls)?);
        }
        let file_watcher = create_watcher(&args.watcher_config())?;

        let store = ProgressStore::new(&args.progress_file);
        let progress = match store.load() {
            Ok(progress) => progress,
            Err(e) => {
                error!(
                    path = ?store.path(),
                    error = %e,
                    "Unable to load progress file, resuming nothing"
                );
                Progress::new()
            }
        };

        let mut receivers_task_set = JoinSet::new();
        let mut pipeline_task_set = JoinSet::new();
        let mut exporters_task_set = JoinSet::new();

        let receivers_cancel = CancellationToken::new();
        let pipeline_cancel = CancellationToken::new();
        let exporters_cancel = CancellationToken::new();

        let (acked_tx, acked_rx) = bounded::<EventPage>(ACKED_QUEUE_SIZE);

        let groups = config.network.iter().zip(connectors).zip(group_events);
        for ((group, connector), events_rx) in groups {
            let (pages_tx, pages_rx) = bounded::<EventPage>(PAGE_QUEUE_SIZE);

            let spooler = Spooler::new(events_rx, pages_tx, args.spool_config());
            let token = pipeline_cancel.clone();
            pipeline_task_set.spawn(async move { spooler.start(token).await });

            let publisher_config = PublisherConfig {
                timeout: group.timeout(),
                ..Default::default()
            };
            for (id, server) in group.servers.iter().enumerate() {
                info!(group = %group.name, server = %server, publisher = id, "Starting publisher");
                let publisher = Publisher::new(
                    id,
                    server.clone(),
                    connector.clone(),
                    publisher_config.clone(),
                    pages_rx.clone(),
                    acked_tx.clone(),
                );
                let token = exporters_cancel.clone();
                exporters_task_set.spawn(async move {
                    publisher.run(token).await;
                    Ok(())
                });
            }
        }
        // publishers hold the only senders, the registrar stops once they are gone
        drop(acked_tx);

        let registrar = Registrar::new(acked_rx, store);
        let token = exporters_cancel.clone();
        exporters_task_set.spawn(async move {
            registrar.run(token).await;
            Ok(())
        });

        let rotation_watcher =
            RotationWatcher::new(file_watcher, ctx.registry().clone(), watch_rx);
        let token = receivers_cancel.clone();
        receivers_task_set.spawn(async move {
            watcher::run_blocking(rotation_watcher, token).await;
            Ok(())
        });

        for file_group in config.files {
            let Some(output) = routes.group(&file_group.dest) else {
                return Err(format!("unknown network group {}", file_group.dest).into());
            };

            let prospector = Prospector::new(
                ctx.clone(),
                file_group.group,
                output.clone(),
                args.prospector_config(),
            )?;
            let progress = progress.clone();
            let token = receivers_cancel.clone();
            receivers_task_set.spawn(async move {
                prospector.run(progress, token).await;
                Ok(())
            });
        }

        let mut result = Ok(());
        select! {
            _ = agent_cancel.cancelled() => {
                debug!("Agent cancellation signaled.");
            },
            e = wait::wait_for_any_task(&mut receivers_task_set) => {
                match e {
                    Ok(()) => warn!("Unexpected early exit of receiver."),
                    Err(e) => result = Err(e),
                }
            },
            e = wait::wait_for_any_task(&mut pipeline_task_set) => {
                match e {
                    Ok(()) => warn!("Unexpected early exit of spooler."),
                    Err(e) => result = Err(e),
                }
            },
            e = wait::wait_for_any_task(&mut exporters_task_set) => {
                match e {
                    Ok(()) => warn!("Unexpected early exit of publisher."),
                    Err(e) => result = Err(e),
                }
            }
        }
        result?;

        // Step one, stop discovering files and watching for rotations.
        receivers_cancel.cancel();
        let res =
            wait::wait_for_tasks_with_timeout(&mut receivers_task_set, Duration::from_secs(1))
                .await;
        if let Err(e) = res {
            return Err(format!("timed out waiting for receiver exit: {}", e).into());
        }

        // Harvesters keep their spooler inputs open, so the spoolers are
        // stopped outright. Spooled events were never acknowledged and will
        // be read again on restart.
        drop(routes);
        drop(ctx);
        pipeline_cancel.cancel();
        let res =
            wait::wait_for_tasks_with_timeout(&mut pipeline_task_set, Duration::from_millis(500))
                .await;
        if let Err(e) = res {
            return Err(format!("timed out waiting for spooler exit: {}", e).into());
        }

        // With the spoolers gone the page queues close. Publishers get the
        // shutdown timeout to deliver the page they hold.
        let res =
            wait::wait_for_tasks_with_timeout(&mut exporters_task_set, args.shutdown_timeout())
                .await;
        if res.is_err() {
            warn!("Publishers did not finish in-flight pages, cancelling.");
            exporters_cancel.cancel();

            let res =
                wait::wait_for_tasks_with_timeout(&mut exporters_task_set, Duration::from_secs(1))
                    .await;
            if let Err(e) = res {
                return Err(format!("timed out waiting for publishers to exit: {}", e).into());
            }
        }

        Ok(())
    }
}
