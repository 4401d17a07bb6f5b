use std::sync::Arc;
use std::time::Instant;

use rand::{rngs::StdRng, SeedableRng};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::api::config::{ClusterConfig, DEFAULT_BUFFER_SIZE, DEFAULT_COMMAND_BUFFER_SIZE};
use crate::error::{Error, Result};
use crate::pb::{self, cluster_message::Action, ClusterMessage, GossipEnvelope, JoinRequest};

use super::disseminate::{EventDisseminator, OverflowStrategy, Subscription, SubscriptionId};
use super::event::{diff, CurrentClusterState, EventFilter};
use super::gossip::{Gossiper, GossiperState, MissedReply};
use super::state::{JoinOutcome, MembershipState, MergeOutcome};
use super::transport::{decode_message, send_message, TransportLayer};
use super::view::MembershipView;

/// Everything the node actor reacts to, processed one at a time.
#[derive(Debug)]
pub(crate) enum Command {
    Join(String),
    Leave(String),
    Down(String),
    Inbound(ClusterMessage),
    GossipTick,
    Subscribe {
        filter: EventFilter,
        strategy: OverflowStrategy,
        reply: oneshot::Sender<Subscription>,
    },
    Shutdown,
}

/// Handle to a node. The membership state itself lives in the actor task
/// started by [`ClusterNode::run`] and is only reachable through commands.
pub(crate) struct ClusterNode<T: TransportLayer> {
    addr: String,
    config: Arc<ClusterConfig>,
    socket: Arc<T>,
    disseminator: Arc<EventDisseminator>,
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<CurrentClusterState>,
    actor: Mutex<Option<NodeActor<T>>>,
}

impl<T: TransportLayer> ClusterNode<T> {
    pub(crate) fn try_new(socket: T, config: ClusterConfig) -> Result<Self> {
        let addr = socket.local_addr()?;
        let socket = Arc::new(socket);
        let config = Arc::new(config);
        let disseminator = Arc::new(EventDisseminator::new(
            &addr,
            config.subscriber_buffer_size(),
            config.overflow_strategy(),
        ));

        let (commands, inbox) = mpsc::channel(DEFAULT_COMMAND_BUFFER_SIZE);
        let state = MembershipState::new(&addr, config.incarnation());
        let (publisher, snapshot) = watch::channel(state.snapshot());

        let actor = NodeActor {
            addr: addr.clone(),
            config: config.clone(),
            socket: socket.clone(),
            gossiper: Gossiper::new(&addr, config.gossip_timeout()),
            state,
            disseminator: disseminator.clone(),
            publisher,
            join_targets: vec![],
            rng: StdRng::from_entropy(),
            inbox,
        };

        Ok(Self {
            addr,
            config,
            socket,
            disseminator,
            commands,
            snapshot,
            actor: Mutex::new(Some(actor)),
        })
    }

    pub(crate) fn addr(&self) -> &str {
        &self.addr
    }

    pub(crate) fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub(crate) fn state(&self) -> CurrentClusterState {
        self.snapshot.borrow().clone()
    }

    pub(crate) async fn join(&self, address: impl Into<String>) -> Result<()> {
        self.enqueue(Command::Join(address.into())).await
    }

    pub(crate) async fn leave(&self, address: impl Into<String>) -> Result<()> {
        self.enqueue(Command::Leave(address.into())).await
    }

    pub(crate) async fn down(&self, address: impl Into<String>) -> Result<()> {
        self.enqueue(Command::Down(address.into())).await
    }

    pub(crate) fn subscribe(&self, filter: EventFilter) -> Subscription {
        self.disseminator.subscribe(filter)
    }

    pub(crate) fn subscribe_with(
        &self,
        filter: EventFilter,
        strategy: OverflowStrategy,
    ) -> Subscription {
        self.disseminator.subscribe_with(filter, strategy)
    }

    /// Subscribes and replays the current state before any later event.
    pub(crate) async fn subscribe_with_initial_state(
        &self,
        filter: EventFilter,
        strategy: OverflowStrategy,
    ) -> Result<Subscription> {
        if let Some(actor) = self.actor.lock().await.as_ref() {
            return Ok(actor.subscribe_with_initial_state(filter, strategy));
        }

        let (reply, rx) = oneshot::channel();
        self.enqueue(Command::Subscribe {
            filter,
            strategy,
            reply,
        })
        .await?;

        rx.await.map_err(|_| Error::Internal {
            message: format!("node {} stopped before subscribing", &self.addr),
            location: snafu::location!(),
        })
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.disseminator.unsubscribe(id)
    }

    /// Starts the actor, the receiver and the gossip timer,
    /// then joins the configured seed nodes.
    pub(crate) async fn run(&self) -> Result<Vec<JoinHandle<()>>> {
        let actor = self.actor.lock().await.take().ok_or_else(|| Error::Internal {
            message: format!("node {} is already running", &self.addr),
            location: snafu::location!(),
        })?;

        tracing::info!("[{}] starting node #{}", &self.addr, self.config.incarnation());

        let handles = vec![
            tokio::spawn(actor.run()),
            self.spawn_receiver(),
            self.spawn_ticker(),
        ];

        for peer in self.config.known_peers() {
            self.join(peer.clone()).await?;
        }

        Ok(handles)
    }

    /// Leaves the cluster and waits until the actor stopped.
    ///
    /// A live member first leaves gracefully and keeps gossiping until the
    /// leader removed it, bounded by the configured leave timeout. Only then,
    /// or for a node that is not a member, the actor is told to stop.
    pub(crate) async fn shutdown(&self) -> Result<()> {
        if let Some(actor) = self.actor.lock().await.take() {
            tracing::info!("[{}] shutting down a node that never ran", &self.addr);
            actor.disseminator.close();
            return Ok(());
        }

        if self.is_live_member() {
            if self.leave(self.addr.clone()).await.is_err() {
                return Ok(());
            }

            let leave_timeout = self.config.leave_timeout();
            match tokio::time::timeout(leave_timeout, self.commands.closed()).await {
                Ok(()) => return Ok(()),
                Err(_) => tracing::warn!(
                    "[{}] not removed within {:?}, stopping anyway",
                    &self.addr,
                    leave_timeout
                ),
            }
        }

        if self.commands.send(Command::Shutdown).await.is_ok() {
            self.commands.closed().await;
        }

        Ok(())
    }

    fn is_live_member(&self) -> bool {
        self.snapshot
            .borrow()
            .member(&self.addr)
            .is_some_and(|member| {
                member.incarnation() == self.config.incarnation() && member.status().is_live()
            })
    }

    async fn enqueue(&self, command: Command) -> Result<()> {
        self.commands.send(command).await.map_err(|_| Error::Internal {
            message: format!("node {} is stopped", &self.addr),
            location: snafu::location!(),
        })
    }

    fn spawn_receiver(&self) -> JoinHandle<()> {
        let addr = self.addr.clone();
        let socket = self.socket.clone();
        let commands = self.commands.clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];

            loop {
                let len = tokio::select! {
                    _ = commands.closed() => break,
                    result = socket.recv(&mut buf) => match result {
                        Ok(len) => len,
                        Err(e) => {
                            tracing::error!("[{}] error while receiving: {}", &addr, e);
                            continue;
                        }
                    },
                };

                match decode_message(&buf[..len]) {
                    Ok(message) => {
                        if commands.send(Command::Inbound(message)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("[{}] dropping undecodable datagram: {}", &addr, e),
                }
            }

            tracing::debug!("[{}] receiver stopped", &addr);
        })
    }

    fn spawn_ticker(&self) -> JoinHandle<()> {
        let addr = self.addr.clone();
        let commands = self.commands.clone();
        let gossip_interval = self.config.gossip_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(gossip_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = commands.closed() => break,
                    _ = interval.tick() => {
                        if commands.send(Command::GossipTick).await.is_err() {
                            break;
                        }
                    }
                }
            }

            tracing::debug!("[{}] gossip timer stopped", &addr);
        })
    }
}

/// Single writer of the node's [`MembershipState`].
struct NodeActor<T: TransportLayer> {
    addr: String,
    config: Arc<ClusterConfig>,
    socket: Arc<T>,
    state: MembershipState,
    gossiper: Gossiper,
    disseminator: Arc<EventDisseminator>,
    publisher: watch::Sender<CurrentClusterState>,
    join_targets: Vec<String>,
    rng: StdRng,
    inbox: mpsc::Receiver<Command>,
}

impl<T: TransportLayer> NodeActor<T> {
    async fn run(mut self) {
        while let Some(command) = self.inbox.recv().await {
            if !self.handle(command).await {
                break;
            }
        }

        self.disseminator.close();
        tracing::info!("[{}] node stopped", &self.addr);
    }

    /// Applies one command and publishes the resulting events.
    /// Returns `false` once the node has to stop.
    async fn handle(&mut self, command: Command) -> bool {
        let before = self.state.view().clone();

        let running = match command {
            Command::Join(target) => {
                self.on_join(target).await;
                true
            }
            Command::Leave(address) => {
                self.state.request_leave(&address);
                true
            }
            Command::Down(address) => {
                self.state.request_down(&address);
                true
            }
            Command::Inbound(message) => {
                self.on_message(message).await;
                true
            }
            Command::GossipTick => {
                self.on_tick().await;
                true
            }
            Command::Subscribe {
                filter,
                strategy,
                reply,
            } => {
                let _ = reply.send(self.subscribe_with_initial_state(filter, strategy));
                true
            }
            Command::Shutdown => {
                self.on_shutdown().await;
                false
            }
        };

        self.commit(&before);

        if running && self.state.is_terminated() {
            tracing::info!("[{}] no longer a cluster member, stopping", &self.addr);
            return false;
        }
        running
    }

    fn commit(&mut self, before: &MembershipView) {
        // the snapshot is never older than a delivered event
        self.publisher.send_replace(self.state.snapshot());
        self.disseminator.publish(diff(before, self.state.view()));
    }

    fn subscribe_with_initial_state(
        &self,
        filter: EventFilter,
        strategy: OverflowStrategy,
    ) -> Subscription {
        let initial = diff(&MembershipView::new(), self.state.view());
        self.disseminator
            .subscribe_with_initial(filter, strategy, initial)
    }

    async fn on_join(&mut self, target: String) {
        if self.state.is_member() {
            tracing::debug!("[{}] already a member, ignoring join of {}", &self.addr, &target);
            return;
        }

        if target == self.addr {
            self.state.join_self();
            return;
        }

        if !self.join_targets.contains(&target) {
            self.join_targets.push(target.clone());
        }
        self.send_join_request(&target).await;
    }

    async fn on_message(&mut self, message: ClusterMessage) {
        match message.action {
            Some(Action::JoinRequest(JoinRequest { from, incarnation })) => {
                self.observe(&from);

                match self.state.request_join(&from, incarnation) {
                    JoinOutcome::Admitted | JoinOutcome::AlreadyMember => {
                        self.send_view(&from, true).await
                    }
                    JoinOutcome::Rejected => {}
                }
            }
            Some(Action::Gossip(GossipEnvelope {
                from,
                is_reply,
                view,
            })) => {
                self.observe(&from);

                let Some(view) = view else {
                    tracing::warn!("[{}] gossip from {} without a view", &self.addr, &from);
                    return;
                };

                let remote = match MembershipView::try_from(view) {
                    Ok(remote) => remote,
                    Err(e) => {
                        tracing::warn!("[{}] invalid view from {}: {}", &self.addr, &from, e);
                        return;
                    }
                };

                let outcome = self.state.apply_remote_update(remote);
                tracing::debug!("[{}] gossip from {}: {:?}", &self.addr, &from, outcome);

                if !is_reply && outcome != MergeOutcome::Ignored {
                    self.send_view(&from, true).await;
                }
            }
            None => {
                let e = Error::InvalidData {
                    message: "message without an action".to_string(),
                    location: snafu::location!(),
                };
                tracing::warn!("[{}] {}", &self.addr, e);
            }
        }
    }

    async fn on_tick(&mut self) {
        let now = Instant::now();

        if let Some(missed) = self.gossiper.check_timeout(now) {
            self.on_missed_reply(missed);
        }

        if !self.state.is_member() {
            let targets = self.join_targets.clone();
            for target in targets {
                self.send_join_request(&target).await;
            }
            return;
        }

        // one outstanding request at a time
        if *self.gossiper.state() == GossiperState::Idle {
            if let Some(target) = self.gossiper.select_target(self.state.view(), &mut self.rng) {
                self.send_view(&target, false).await;
                self.gossiper.record_sent(target, now);
            }
        }

        for member in self.state.leader_actions() {
            if member.address() != self.addr {
                self.send_view(member.address(), true).await;
            }
        }

        self.gossiper.retain_members(self.state.view());
    }

    fn on_missed_reply(&mut self, missed: MissedReply) {
        let MissedReply {
            target,
            consecutive,
        } = missed;

        if consecutive >= self.config.unreachable_after_failures()
            && self.state.mark_unreachable(&target)
        {
            tracing::warn!(
                "[{}] {} is unreachable after {} missed replies",
                &self.addr,
                &target,
                consecutive
            );
        }

        if let Some(threshold) = self.config.down_after_failures() {
            if consecutive >= threshold && self.state.request_down(&target) {
                tracing::warn!(
                    "[{}] downing {} after {} missed replies",
                    &self.addr,
                    &target,
                    consecutive
                );
            }
        }
    }

    async fn on_shutdown(&mut self) {
        let addr = self.addr.clone();
        self.state.request_leave(&addr);

        for target in self.gossiper.broadcast_targets(self.state.view()) {
            self.send_view(&target, true).await;
        }
    }

    /// Any message proves that its sender is alive.
    fn observe(&mut self, from: &str) {
        self.gossiper.record_reply(from);

        if self.state.is_unreachable(from) {
            self.state.mark_reachable(from);
        }
    }

    async fn send_join_request(&self, target: &str) {
        let message = ClusterMessage {
            action: Some(Action::JoinRequest(JoinRequest {
                from: self.addr.clone(),
                incarnation: self.state.incarnation(),
            })),
        };

        tracing::debug!("[{}] sending join request to {}", &self.addr, target);
        if let Err(e) = send_message(self.socket.as_ref(), &message, target).await {
            tracing::error!("[{}] failed to send join request to {}: {}", &self.addr, target, e);
        }
    }

    async fn send_view(&self, target: &str, is_reply: bool) {
        let message = ClusterMessage {
            action: Some(Action::Gossip(GossipEnvelope {
                from: self.addr.clone(),
                is_reply,
                view: Some(pb::GossipView::from(self.state.view())),
            })),
        };

        if let Err(e) = send_message(self.socket.as_ref(), &message, target).await {
            tracing::error!("[{}] failed to send gossip to {}: {}", &self.addr, target, e);
        }
    }
}
