//! Routes channel updates to the booking conversation and the menu.
//!
//! Each conversation gets its own lane: a task that handles that chat's
//! updates one at a time, in arrival order. Lanes of different chats run
//! concurrently and close themselves after a quiet period.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::booking::{
    BookingScene, BookingSessionState, ConversationKey, InboundEvent, MenuCommand, Reply,
    SceneOutcome, SceneTurn, SessionStore,
};
use crate::bot::menu::MenuHandler;
use crate::channels::{ChannelManager, IncomingUpdate, UpdateStream};
use crate::store::{User, UserStore};

const EXPIRED: &str = "⌛ This booking session has expired. Press 📅 Book to start again.";
const NOT_UNDERSTOOD: &str = "Please choose an action from the menu below.";
const INTERNAL_ERROR: &str = "⚠️ Something went wrong. Please try again later.";

/// How long an idle lane task is kept around.
const LANE_IDLE: Duration = Duration::from_secs(300);

/// Everything a lane needs to handle one update.
pub struct UpdateHandler {
    users: Arc<dyn UserStore>,
    scene: BookingScene,
    menu: MenuHandler,
    sessions: Arc<SessionStore>,
    channels: Arc<ChannelManager>,
}

impl UpdateHandler {
    pub fn new(
        users: Arc<dyn UserStore>,
        scene: BookingScene,
        menu: MenuHandler,
        sessions: Arc<SessionStore>,
        channels: Arc<ChannelManager>,
    ) -> Self {
        Self {
            users,
            scene,
            menu,
            sessions,
            channels,
        }
    }

    /// Handle one update end to end: resolve the user, run the conversation
    /// or menu, acknowledge the button press and send the replies.
    pub async fn process(&self, update: IncomingUpdate) {
        let mut user = match self.users.upsert_chat_user(&update.sender).await {
            Ok(user) => user,
            Err(e) => {
                error!(channel = %update.channel, chat_id = %update.chat_id, error = %e, "Failed to resolve user");
                self.acknowledge(&update, None).await;
                self.send(&update, &[Reply::text(INTERNAL_ERROR)]).await;
                return;
            }
        };

        debug!(
            channel = %update.channel,
            chat_id = %update.chat_id,
            user_id = user.id,
            event = update.event.kind(),
            "Update received"
        );

        let key = update.conversation_key();
        let (toast, replies) = match self.sessions.take(&key).await {
            Some(mut session) => {
                let turn = self
                    .scene
                    .handle(&mut session, &mut user, update.event.clone())
                    .await;
                self.finish(key, session, turn, &user).await
            }
            None => match &update.event {
                InboundEvent::Menu(command) => self.run_command(key, *command, &user).await,
                InboundEvent::Selection(_) => {
                    debug!(chat_id = %update.chat_id, "Selection without a live session");
                    (
                        Some("Session expired".to_string()),
                        vec![Reply::main_menu(EXPIRED)],
                    )
                }
                InboundEvent::Text(_) => (None, vec![Reply::main_menu(NOT_UNDERSTOOD)]),
            },
        };

        self.acknowledge(&update, toast.as_deref()).await;
        self.send(&update, &replies).await;
    }

    /// Run a menu command outside of a booking.
    async fn run_command(
        &self,
        key: ConversationKey,
        command: MenuCommand,
        user: &User,
    ) -> (Option<String>, Vec<Reply>) {
        if command == MenuCommand::Book {
            let mut session = BookingSessionState::new();
            let turn = self.scene.enter(&mut session).await;
            return self.finish(key, session, turn, user).await;
        }
        (None, vec![self.menu.handle(command, user).await])
    }

    /// Keep or drop the session according to the turn's outcome.
    async fn finish(
        &self,
        key: ConversationKey,
        session: BookingSessionState,
        turn: SceneTurn,
        user: &User,
    ) -> (Option<String>, Vec<Reply>) {
        let SceneTurn {
            toast,
            mut replies,
            outcome,
        } = turn;

        match outcome {
            SceneOutcome::Active => self.sessions.save(key, session).await,
            SceneOutcome::Committed(reservation) => {
                info!(
                    user_id = user.id,
                    reservation_id = reservation.id,
                    remote_id = reservation.remote_reservation_id,
                    "Booking committed"
                );
            }
            SceneOutcome::Cancelled => {}
            SceneOutcome::Interrupted(command) => {
                // Interrupts never carry Book; the scene restarts itself for it.
                replies.push(self.menu.handle(command, user).await);
            }
        }
        (toast, replies)
    }

    async fn acknowledge(&self, update: &IncomingUpdate, toast: Option<&str>) {
        let Some(callback_id) = &update.callback_id else {
            return;
        };
        if let Err(e) = self
            .channels
            .acknowledge(&update.channel, callback_id, toast)
            .await
        {
            warn!(channel = %update.channel, error = %e, "Failed to acknowledge button press");
        }
    }

    async fn send(&self, update: &IncomingUpdate, replies: &[Reply]) {
        for reply in replies {
            if let Err(e) = self
                .channels
                .deliver(&update.channel, &update.chat_id, reply)
                .await
            {
                error!(channel = %update.channel, chat_id = %update.chat_id, error = %e, "Failed to deliver reply");
            }
        }
    }
}

struct Lane {
    tx: mpsc::UnboundedSender<IncomingUpdate>,
    handle: JoinHandle<()>,
}

/// Fans updates out to per-conversation lanes.
pub struct Dispatcher {
    handler: Arc<UpdateHandler>,
    lanes: HashMap<ConversationKey, Lane>,
    lane_idle: Duration,
}

impl Dispatcher {
    pub fn new(handler: Arc<UpdateHandler>) -> Self {
        Self {
            handler,
            lanes: HashMap::new(),
            lane_idle: LANE_IDLE,
        }
    }

    pub fn with_lane_idle(mut self, lane_idle: Duration) -> Self {
        self.lane_idle = lane_idle;
        self
    }

    /// Consume updates until the stream ends, then wait for every lane to
    /// drain.
    pub async fn run(mut self, mut updates: UpdateStream) {
        info!("Dispatcher ready and listening");
        while let Some(update) = updates.next().await {
            self.dispatch(update);
        }
        info!("All channel streams ended, draining lanes...");
        self.drain().await;
    }

    /// Hand an update to its conversation's lane, opening one if needed.
    pub fn dispatch(&mut self, update: IncomingUpdate) {
        self.prune_closed();
        let key = update.conversation_key();
        let update = match self.lanes.get(&key) {
            Some(lane) => match lane.tx.send(update) {
                Ok(()) => return,
                // Lane closed itself while idle
                Err(mpsc::error::SendError(update)) => update,
            },
            None => update,
        };

        let previous = self.lanes.remove(&key).map(|lane| lane.handle);
        let lane = self.spawn_lane(key.clone(), previous);
        if lane.tx.send(update).is_err() {
            error!(conversation = %key, "Freshly opened lane rejected an update");
        }
        self.lanes.insert(key, lane);
    }

    fn spawn_lane(&self, key: ConversationKey, previous: Option<JoinHandle<()>>) -> Lane {
        let (tx, mut rx) = mpsc::unbounded_channel::<IncomingUpdate>();
        let handler = Arc::clone(&self.handler);
        let idle = self.lane_idle;

        let handle = tokio::spawn(async move {
            // Keep per-conversation order across lane restarts
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            debug!(conversation = %key, "Lane opened");
            loop {
                match tokio::time::timeout(idle, rx.recv()).await {
                    Ok(Some(update)) => handler.process(update).await,
                    Ok(None) => break,
                    Err(_) => {
                        rx.close();
                        while let Ok(update) = rx.try_recv() {
                            handler.process(update).await;
                        }
                        break;
                    }
                }
            }
            debug!(conversation = %key, "Lane closed");
        });

        Lane { tx, handle }
    }

    /// Forget lanes whose task has already exited.
    fn prune_closed(&mut self) {
        self.lanes.retain(|_, lane| !lane.handle.is_finished());
    }

    /// Number of lanes currently tracked.
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    async fn drain(&mut self) {
        for (_, lane) in self.lanes.drain() {
            drop(lane.tx);
            if let Err(e) = lane.handle.await {
                error!(error = %e, "Lane task failed");
            }
        }
    }
}
