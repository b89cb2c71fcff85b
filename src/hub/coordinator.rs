//! Hub coordinator
//!
//! The top-level actor. It exclusively owns the connection registry, the
//! subscription registry, and the debounce scheduler; every mutation flows
//! through its command channel, so connection tasks, timer expiries, the
//! liveness sweep, and completed collaborator calls are all serialized onto
//! one task and never race each other.
//!
//! The result cache is the one shared resource: it is internally
//! synchronized and spawned collaborator tasks read and write it directly.
//! Awaiting the collaborator always happens on a spawned task, never on the
//! coordinator, so one slow analysis cannot stall dispatch for other
//! connections.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::cache::{fingerprint, CacheStats, ResultCache};
use crate::collaborator::AnalysisCollaborator;
use crate::config::HubConfig;
use crate::error::{HubError, Result};
use crate::hub::broadcast;
use crate::hub::connections::{ConnectionId, ConnectionRegistry, ConnectionState, DeliveryStats};
use crate::hub::debounce::{DebounceFire, DebounceScheduler};
use crate::hub::protocol::{
    ClientEnvelope, ClientMessage, ServerEnvelope, ServerMessage, Welcome, SUPPORTED_MESSAGES,
};
use crate::hub::subscriptions::{FileId, SubscriptionRegistry};

/// Commands processed by the hub actor
pub enum HubCommand {
    /// A transport finished its handshake and wants a connection record
    Attach {
        outbound: mpsc::UnboundedSender<ServerEnvelope>,
        capabilities: Vec<String>,
        reply: oneshot::Sender<ConnectionId>,
    },
    /// One inbound text frame from a connection
    Inbound {
        connection_id: ConnectionId,
        text: String,
    },
    /// Transport-level liveness signal (WebSocket pong frame); refreshes the
    /// connection's activity without carrying a message
    Activity { connection_id: ConnectionId },
    /// The transport closed (client close frame, transport error, or EOF)
    Disconnect { connection_id: ConnectionId },
    /// A spawned query task finished; deliver its reply to the requester
    Reply {
        connection_id: ConnectionId,
        message: ServerMessage,
    },
    /// A spawned `analyze-code` call finished
    AnalysisDone {
        connection_id: ConnectionId,
        request_id: String,
        file_id: FileId,
        outcome: Result<serde_json::Value>,
    },
    /// A spawned debounced incremental run finished
    DebounceDone {
        file_id: FileId,
        outcome: Result<serde_json::Value>,
    },
    /// Periodic liveness sweep tick
    SweepStale,
    /// Operational stats snapshot
    GetStats { reply: oneshot::Sender<HubStats> },
    /// Scoped teardown: cancel timers, close connections, stop the actor
    Shutdown { reply: oneshot::Sender<()> },
}

/// Operational stats returned by [`HubHandle::stats`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    pub connected_clients: usize,
    pub active_subscriptions: usize,
    pub pending_analysis: usize,
    pub delivery: DeliveryStats,
    pub cache: CacheStats,
}

/// Cloneable handle for talking to a running hub
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    /// Register a connection; the hub queues the welcome message before
    /// this returns.
    pub async fn attach(
        &self,
        outbound: mpsc::UnboundedSender<ServerEnvelope>,
        capabilities: Vec<String>,
    ) -> Result<ConnectionId> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubCommand::Attach {
                outbound,
                capabilities,
                reply,
            })
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Forward one inbound frame from a connection
    pub fn inbound(&self, connection_id: ConnectionId, text: String) -> Result<()> {
        self.tx
            .send(HubCommand::Inbound {
                connection_id,
                text,
            })
            .map_err(|_| HubError::Closed)
    }

    /// Report transport-level liveness (a pong frame) for a connection, so
    /// listen-only clients on healthy transports survive the stale sweep
    pub fn activity(&self, connection_id: ConnectionId) -> Result<()> {
        self.tx
            .send(HubCommand::Activity { connection_id })
            .map_err(|_| HubError::Closed)
    }

    /// Report a transport-level disconnect
    pub fn disconnect(&self, connection_id: ConnectionId) -> Result<()> {
        self.tx
            .send(HubCommand::Disconnect { connection_id })
            .map_err(|_| HubError::Closed)
    }

    pub async fn stats(&self) -> Result<HubStats> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubCommand::GetStats { reply })
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Shut the hub down: all timers cancelled, all connections closed.
    /// Resolves once registry cleanup has completed.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubCommand::Shutdown { reply })
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)
    }
}

/// The hub actor state
pub struct Hub {
    config: HubConfig,
    cache: Arc<ResultCache>,
    collaborator: Arc<dyn AnalysisCollaborator>,
    connections: ConnectionRegistry,
    subscriptions: SubscriptionRegistry,
    scheduler: DebounceScheduler,
    tx: mpsc::UnboundedSender<HubCommand>,
    rx: mpsc::UnboundedReceiver<HubCommand>,
    fire_rx: mpsc::UnboundedReceiver<DebounceFire>,
}

impl Hub {
    /// Spawn the hub actor plus its background sweeps. Returns the handle
    /// used by transports and the operational surface.
    pub fn spawn(config: HubConfig, collaborator: Arc<dyn AnalysisCollaborator>) -> HubHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let (fire_tx, fire_rx) = mpsc::unbounded_channel();
        let cache = Arc::new(ResultCache::new(
            config.cache_shards,
            config.cache_max_entries,
        ));

        // Liveness sweep: periodic tick that closes unresponsive connections
        let sweep_tx = tx.clone();
        let sweep_interval = config.liveness_sweep_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            interval.tick().await; // first tick is immediate
            loop {
                interval.tick().await;
                if sweep_tx.send(HubCommand::SweepStale).is_err() {
                    break;
                }
            }
        });

        // Cache sweep: evicts expired entries to bound memory
        let sweep_cache = Arc::clone(&cache);
        let sweep_probe = tx.clone();
        let cache_sweep_interval = config.cache_sweep_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cache_sweep_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                if sweep_probe.is_closed() {
                    break;
                }
                sweep_cache.sweep_expired();
            }
        });

        let hub = Self {
            config,
            cache,
            collaborator,
            connections: ConnectionRegistry::new(),
            subscriptions: SubscriptionRegistry::new(),
            scheduler: DebounceScheduler::new(fire_tx),
            tx: tx.clone(),
            rx,
            fire_rx,
        };
        tokio::spawn(hub.run());

        HubHandle { tx }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if !self.handle_command(cmd) {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                fire = self.fire_rx.recv() => {
                    if let Some(fire) = fire {
                        self.on_debounce_fire(fire);
                    }
                }
            }
        }
        tracing::info!("hub coordinator stopped");
    }

    /// Returns false when the actor should stop
    fn handle_command(&mut self, cmd: HubCommand) -> bool {
        match cmd {
            HubCommand::Attach {
                outbound,
                capabilities,
                reply,
            } => {
                let id = self.connections.register(outbound, capabilities);
                self.connections.set_state(&id, ConnectionState::Open);
                self.connections.send_to(
                    &id,
                    ServerMessage::Welcome(Welcome {
                        connection_id: id.clone(),
                        server_version: env!("CARGO_PKG_VERSION").to_string(),
                        capabilities: SUPPORTED_MESSAGES.iter().map(|s| s.to_string()).collect(),
                    }),
                );
                tracing::info!("connection {} open", id);
                let _ = reply.send(id);
            }

            HubCommand::Inbound {
                connection_id,
                text,
            } => {
                if !self.connections.contains(&connection_id) {
                    tracing::debug!("dropping frame for unknown connection {}", connection_id);
                    return true;
                }
                self.connections.touch(&connection_id);
                match serde_json::from_str::<ClientEnvelope>(&text) {
                    Ok(envelope) => self.dispatch(&connection_id, envelope),
                    Err(e) => {
                        // Malformed message: error reply, connection stays open
                        let err = HubError::protocol(e.to_string());
                        self.send_error(&connection_id, &err, None);
                    }
                }
            }

            HubCommand::Activity { connection_id } => {
                self.connections.touch(&connection_id);
            }

            HubCommand::Disconnect { connection_id } => {
                self.teardown(&connection_id, "disconnect");
            }

            HubCommand::Reply {
                connection_id,
                message,
            } => {
                self.connections.send_to(&connection_id, message);
            }

            HubCommand::AnalysisDone {
                connection_id,
                request_id,
                file_id,
                outcome,
            } => match outcome {
                Ok(result) => {
                    self.connections.send_to(
                        &connection_id,
                        ServerMessage::AnalysisResult {
                            file_id: file_id.clone(),
                            cached: false,
                            result: result.clone(),
                        },
                    );
                    broadcast::notify_subscribers(
                        &mut self.connections,
                        &self.subscriptions,
                        &file_id,
                        &ServerMessage::AnalysisUpdate { file_id: file_id.clone(), result },
                    );
                }
                Err(err) => {
                    tracing::warn!("analyze-code failed for {}: {}", file_id, err);
                    self.send_error(&connection_id, &err, Some(request_id));
                }
            },

            HubCommand::DebounceDone { file_id, outcome } => match outcome {
                Ok(result) => {
                    let summary = broadcast::notify_subscribers(
                        &mut self.connections,
                        &self.subscriptions,
                        &file_id,
                        &ServerMessage::IncrementalUpdate { file_id: file_id.clone(), result },
                    );
                    tracing::debug!(
                        "incremental update for {} delivered to {} subscribers",
                        file_id,
                        summary.delivered
                    );
                }
                Err(err) => {
                    // Subscribers are told too, so they are not left waiting
                    tracing::warn!("incremental analysis failed for {}: {}", file_id, err);
                    broadcast::notify_subscribers(
                        &mut self.connections,
                        &self.subscriptions,
                        &file_id,
                        &ServerMessage::Error {
                            code: err.code().to_string(),
                            message: err.to_string(),
                            request_id: None,
                        },
                    );
                }
            },

            HubCommand::SweepStale => {
                for id in self.connections.list_stale(self.config.liveness_timeout) {
                    tracing::info!("closing stale connection {}", id);
                    self.teardown(&id, "liveness timeout");
                }
            }

            HubCommand::GetStats { reply } => {
                let _ = reply.send(HubStats {
                    connected_clients: self.connections.len(),
                    active_subscriptions: self.subscriptions.len(),
                    pending_analysis: self.scheduler.pending_count(),
                    delivery: self.connections.delivery.clone(),
                    cache: self.cache.stats(),
                });
            }

            HubCommand::Shutdown { reply } => {
                let cancelled = self.scheduler.cancel_all();
                let ids = self.connections.ids();
                let count = ids.len();
                for id in ids {
                    self.connections.set_state(&id, ConnectionState::Closing);
                    self.connections.unregister(&id);
                }
                tracing::info!(
                    "hub shutdown: cancelled {} timers, closed {} connections",
                    cancelled,
                    count
                );
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn dispatch(&mut self, connection_id: &ConnectionId, envelope: ClientEnvelope) {
        let request_id = envelope.id;
        match envelope.message {
            ClientMessage::Ping => {
                self.connections.send_to(connection_id, ServerMessage::Pong);
            }

            ClientMessage::SubscribeAnalysis(sub) => {
                let (subscription_id, outcome) = self.subscriptions.subscribe(
                    connection_id,
                    &sub.file_id,
                    &sub.language,
                    sub.options.clone(),
                );
                tracing::debug!(
                    "connection {} subscribed to {} ({:?})",
                    connection_id,
                    sub.file_id,
                    outcome
                );
                self.connections.send_to(
                    connection_id,
                    ServerMessage::SubscriptionCreated {
                        subscription_id,
                        file_id: sub.file_id,
                        options: sub.options,
                    },
                );
            }

            ClientMessage::UnsubscribeAnalysis { subscription_id } => {
                let owned = self
                    .subscriptions
                    .get(&subscription_id)
                    .map(|s| s.connection_id == *connection_id)
                    .unwrap_or(false);
                if !owned {
                    let err = HubError::SubscriptionNotFound(subscription_id);
                    self.send_error(connection_id, &err, Some(request_id));
                    return;
                }
                if let Some(sub) = self.subscriptions.unsubscribe(&subscription_id) {
                    self.cancel_if_orphaned(&sub.file_id);
                    self.connections.send_to(
                        connection_id,
                        ServerMessage::SubscriptionRemoved {
                            subscription_id: sub.id,
                        },
                    );
                }
            }

            ClientMessage::AnalyzeCode(req) => {
                let fp = fingerprint(&[
                    "analyze",
                    &req.code,
                    &req.language,
                    &req.file_id,
                    &req.options.fingerprint_part(),
                ]);
                if let Some(hit) = self.cache.get(&fp) {
                    self.connections.send_to(
                        connection_id,
                        ServerMessage::AnalysisResult {
                            file_id: req.file_id,
                            cached: true,
                            result: hit,
                        },
                    );
                    return;
                }

                let tx = self.tx.clone();
                let cache = Arc::clone(&self.cache);
                let collaborator = Arc::clone(&self.collaborator);
                let ttl = self.config.cache_ttl;
                let connection_id = connection_id.clone();
                tokio::spawn(async move {
                    let outcome = match collaborator
                        .analyze(&req.code, &req.language, &req.file_id, &req.options)
                        .await
                    {
                        Ok(result) => match serde_json::to_value(&result) {
                            Ok(value) => {
                                cache.put(
                                    &fp,
                                    value.clone(),
                                    ttl,
                                    &[req.language.clone(), req.file_id.clone()],
                                );
                                Ok(value)
                            }
                            Err(e) => Err(HubError::collaborator("analyze-code", e.to_string())),
                        },
                        Err(e) => Err(e),
                    };
                    let _ = tx.send(HubCommand::AnalysisDone {
                        connection_id,
                        request_id,
                        file_id: req.file_id,
                        outcome,
                    });
                });
            }

            ClientMessage::IncrementalUpdate(update) => {
                let interval = self
                    .subscriptions
                    .min_debounce_for(&update.file_id, self.config.default_debounce);
                self.scheduler
                    .schedule(&update.file_id, &update.language, update.changes, interval);
            }

            ClientMessage::SearchSymbols { query, options } => {
                let fp = fingerprint(&["search", &query, &options.fingerprint_part()]);
                if let Some(hit) = self.cache.get(&fp) {
                    self.connections.send_to(
                        connection_id,
                        ServerMessage::SearchResults {
                            query,
                            cached: true,
                            results: hit,
                        },
                    );
                    return;
                }

                let mut tags = vec!["search".to_string()];
                if let Some(lang) = &options.language {
                    tags.push(lang.clone());
                }
                let tx = self.tx.clone();
                let cache = Arc::clone(&self.cache);
                let collaborator = Arc::clone(&self.collaborator);
                let ttl = self.config.cache_ttl;
                let connection_id = connection_id.clone();
                tokio::spawn(async move {
                    let message = match collaborator.search_symbols(&query, &options).await {
                        Ok(results) => match serde_json::to_value(&results) {
                            Ok(value) => {
                                cache.put(&fp, value.clone(), ttl, &tags);
                                ServerMessage::SearchResults {
                                    query,
                                    cached: false,
                                    results: value,
                                }
                            }
                            Err(e) => {
                                error_message(
                                    &HubError::collaborator("search-symbols", e.to_string()),
                                    Some(request_id),
                                )
                            }
                        },
                        Err(e) => error_message(&e, Some(request_id)),
                    };
                    let _ = tx.send(HubCommand::Reply {
                        connection_id,
                        message,
                    });
                });
            }

            ClientMessage::MatchPatterns {
                pattern,
                scope,
                options,
            } => {
                let fp = fingerprint(&[
                    "pattern",
                    &pattern,
                    &scope,
                    &options.fingerprint_part(),
                ]);
                if let Some(hit) = self.cache.get(&fp) {
                    self.connections.send_to(
                        connection_id,
                        ServerMessage::PatternMatches {
                            pattern,
                            cached: true,
                            matches: hit,
                        },
                    );
                    return;
                }

                let mut tags = vec!["pattern".to_string()];
                if let Some(lang) = &options.language {
                    tags.push(lang.clone());
                }
                let tx = self.tx.clone();
                let cache = Arc::clone(&self.cache);
                let collaborator = Arc::clone(&self.collaborator);
                let ttl = self.config.cache_ttl;
                let connection_id = connection_id.clone();
                tokio::spawn(async move {
                    let message = match collaborator.find_matches(&pattern, &scope, &options).await
                    {
                        Ok(matches) => match serde_json::to_value(&matches) {
                            Ok(value) => {
                                cache.put(&fp, value.clone(), ttl, &tags);
                                ServerMessage::PatternMatches {
                                    pattern,
                                    cached: false,
                                    matches: value,
                                }
                            }
                            Err(e) => error_message(
                                &HubError::collaborator("match-patterns", e.to_string()),
                                Some(request_id),
                            ),
                        },
                        Err(e) => error_message(&e, Some(request_id)),
                    };
                    let _ = tx.send(HubCommand::Reply {
                        connection_id,
                        message,
                    });
                });
            }

            ClientMessage::GetReferences(req) => {
                let position_part = format!("{}:{}", req.position.line, req.position.column);
                let fp = fingerprint(&[
                    "references",
                    &req.code,
                    &req.language,
                    &req.file_id,
                    &position_part,
                ]);
                if let Some(hit) = self.cache.get(&fp) {
                    self.connections.send_to(
                        connection_id,
                        ServerMessage::ReferencesResult {
                            file_id: req.file_id,
                            result: hit,
                        },
                    );
                    return;
                }

                let tags = vec![
                    "references".to_string(),
                    req.language.clone(),
                    req.file_id.clone(),
                ];
                let tx = self.tx.clone();
                let cache = Arc::clone(&self.cache);
                let collaborator = Arc::clone(&self.collaborator);
                let ttl = self.config.cache_ttl;
                let connection_id = connection_id.clone();
                tokio::spawn(async move {
                    let message = match collaborator
                        .find_references(&req.code, &req.language, &req.file_id, req.position)
                        .await
                    {
                        Ok(result) => match serde_json::to_value(&result) {
                            Ok(value) => {
                                cache.put(&fp, value.clone(), ttl, &tags);
                                ServerMessage::ReferencesResult {
                                    file_id: req.file_id,
                                    result: value,
                                }
                            }
                            Err(e) => error_message(
                                &HubError::collaborator("get-references", e.to_string()),
                                Some(request_id),
                            ),
                        },
                        Err(e) => error_message(&e, Some(request_id)),
                    };
                    let _ = tx.send(HubCommand::Reply {
                        connection_id,
                        message,
                    });
                });
            }

            ClientMessage::CollaborationJoin { room_id } => {
                // Joining a new room leaves the previous one
                let previous = self
                    .connections
                    .get_mut(connection_id)
                    .and_then(|c| c.room.take());
                if let Some(prev_room) = previous {
                    if prev_room != room_id {
                        broadcast::broadcast_to_room(
                            &mut self.connections,
                            &prev_room,
                            &ServerMessage::CollaborationUserLeft {
                                room_id: prev_room.clone(),
                                connection_id: connection_id.clone(),
                            },
                            Some(connection_id),
                        );
                    }
                }

                let members = self.connections.room_members(&room_id, Some(connection_id));
                if let Some(conn) = self.connections.get_mut(connection_id) {
                    conn.room = Some(room_id.clone());
                }
                self.connections.send_to(
                    connection_id,
                    ServerMessage::CollaborationJoined {
                        room_id: room_id.clone(),
                        members,
                    },
                );
                broadcast::broadcast_to_room(
                    &mut self.connections,
                    &room_id,
                    &ServerMessage::CollaborationUserJoined {
                        room_id: room_id.clone(),
                        connection_id: connection_id.clone(),
                    },
                    Some(connection_id),
                );
            }

            ClientMessage::CollaborationLeave => {
                let room = self
                    .connections
                    .get_mut(connection_id)
                    .and_then(|c| c.room.take());
                if let Some(room_id) = room {
                    broadcast::broadcast_to_room(
                        &mut self.connections,
                        &room_id,
                        &ServerMessage::CollaborationUserLeft {
                            room_id: room_id.clone(),
                            connection_id: connection_id.clone(),
                        },
                        Some(connection_id),
                    );
                }
            }
        }
    }

    /// Claim a fired timer and run the coalesced analysis on its own task
    fn on_debounce_fire(&mut self, fire: DebounceFire) {
        let Some(pending) = self
            .scheduler
            .take_if_current(&fire.file_id, fire.generation)
        else {
            // Superseded by a reset or cancelled; nothing to do
            return;
        };

        let tx = self.tx.clone();
        let cache = Arc::clone(&self.cache);
        let collaborator = Arc::clone(&self.collaborator);
        tokio::spawn(async move {
            let outcome = match collaborator
                .incremental_analyze(&pending.file_id, &pending.payload, &pending.language)
                .await
            {
                Ok(result) => {
                    // The file changed: drop every cached result tagged with it
                    cache.invalidate_tag(&pending.file_id);
                    serde_json::to_value(&result)
                        .map_err(|e| HubError::collaborator("incremental-update", e.to_string()))
                }
                Err(e) => Err(e),
            };
            let _ = tx.send(HubCommand::DebounceDone {
                file_id: pending.file_id,
                outcome,
            });
        });
    }

    /// Full connection teardown: room presence, subscriptions, orphaned
    /// timers, then the connection record itself.
    fn teardown(&mut self, connection_id: &ConnectionId, reason: &str) {
        if !self.connections.contains(connection_id) {
            tracing::debug!("teardown: connection {} already gone", connection_id);
            return;
        }
        tracing::info!("closing connection {} ({})", connection_id, reason);
        self.connections
            .set_state(connection_id, ConnectionState::Closing);

        // Room members hear about the departure before the record drops
        let room = self
            .connections
            .get(connection_id)
            .and_then(|c| c.room.clone());
        if let Some(room_id) = room {
            broadcast::broadcast_to_room(
                &mut self.connections,
                &room_id,
                &ServerMessage::CollaborationUserDisconnected {
                    room_id: room_id.clone(),
                    connection_id: connection_id.clone(),
                },
                Some(connection_id),
            );
        }

        let removed = self.subscriptions.remove_connection(connection_id);
        for sub in &removed {
            self.cancel_if_orphaned(&sub.file_id);
        }

        self.connections.unregister(connection_id);
    }

    /// Cancel the pending timer for a file that lost its last subscriber
    fn cancel_if_orphaned(&mut self, file_id: &str) {
        if !self.subscriptions.has_subscribers(file_id) && self.scheduler.cancel(file_id) {
            tracing::debug!("cancelled orphaned debounce timer for {}", file_id);
        }
    }

    fn send_error(
        &mut self,
        connection_id: &ConnectionId,
        err: &HubError,
        request_id: Option<String>,
    ) {
        self.connections
            .send_to(connection_id, error_message(err, request_id));
    }
}

fn error_message(err: &HubError, request_id: Option<String>) -> ServerMessage {
    ServerMessage::Error {
        code: err.code().to_string(),
        message: err.to_string(),
        request_id,
    }
}
