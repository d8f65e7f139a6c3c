//! The command bridge: owns a panel's subscriptions and turns inbound command messages into hub
//! service calls.

use crate::hub::Hub;
use crate::mqtt::{InboundMessage, Transport};
use crate::panel::PanelConfig;
use crate::topic::{Router, TopicTemplate};
use crate::translate::translate;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not subscribe to `{1}`")]
    Subscribe(#[source] Box<dyn std::error::Error + Send + Sync>, String),
}

#[derive(Debug)]
pub struct Subscription {
    pub template: &'static TopicTemplate,
    pub filter: String,
}

/// Subscriptions taken on behalf of one panel, in the order they were made.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    handles: Vec<Subscription>,
}

impl SubscriptionSet {
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.handles.iter()
    }

    /// Release every handle in the set, leaving it empty.
    ///
    /// All the unsubscribe requests are attempted even if some of them fail. Returns the number
    /// of failed requests.
    async fn release<T: Transport>(&mut self, transport: &T) -> usize {
        let handles = std::mem::take(&mut self.handles);
        let results = futures::future::join_all(
            handles.iter().map(|subscription| transport.unsubscribe(&subscription.filter)),
        )
        .await;
        let mut failures = 0;
        for (subscription, result) in handles.iter().zip(results) {
            if let Err(e) = result {
                failures += 1;
                warn!(
                    message = "could not unsubscribe",
                    filter = %subscription.filter,
                    domain = %subscription.template.domain,
                    command = %subscription.template.command,
                    error = (&e as &dyn std::error::Error)
                );
            }
        }
        failures
    }
}

pub struct Bridge<H, T> {
    router: Router,
    panel: PanelConfig,
    hub: Arc<H>,
    transport: Arc<T>,
    subscriptions: Mutex<SubscriptionSet>,
    active: AtomicBool,
}

impl<H: Hub, T: Transport> Bridge<H, T> {
    pub fn new(router: Router, panel: PanelConfig, hub: Arc<H>, transport: Arc<T>) -> Self {
        Self {
            router,
            panel,
            hub,
            transport,
            subscriptions: Mutex::new(SubscriptionSet::default()),
            active: AtomicBool::new(false),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Subscribe to every command template.
    ///
    /// If any subscription fails, the ones already made are released again and the bridge stays
    /// inactive.
    pub async fn activate(&self) -> Result<(), Error> {
        let mut subscriptions = self.subscriptions.lock().await;
        if !subscriptions.is_empty() {
            warn!(panel.id = %self.panel.id, "bridge is already active");
            return Ok(());
        }
        for (template, filter) in self.router.filters() {
            if let Err(e) = self.transport.subscribe(&filter).await {
                subscriptions.release(&*self.transport).await;
                return Err(Error::Subscribe(Box::new(e), filter));
            }
            debug!(filter = %filter, "subscribed");
            subscriptions.handles.push(Subscription { template, filter });
        }
        self.active.store(true, Ordering::Release);
        info!(
            panel.id = %self.panel.id,
            panel.name = %self.panel.name,
            base = self.router.base(),
            subscriptions = subscriptions.len(),
            "bridge activated"
        );
        Ok(())
    }

    /// Subscribe again to everything in the active set, after the broker dropped the session.
    ///
    /// Every subscription is attempted even if some of them fail. Returns the number of failed
    /// requests. An inactive bridge has nothing to renew.
    pub async fn resubscribe(&self) -> usize {
        let subscriptions = self.subscriptions.lock().await;
        if subscriptions.is_empty() {
            debug!(panel.id = %self.panel.id, "bridge is not active, nothing to resubscribe");
            return 0;
        }
        let results = futures::future::join_all(
            subscriptions.iter().map(|subscription| self.transport.subscribe(&subscription.filter)),
        )
        .await;
        let mut failures = 0;
        for (subscription, result) in subscriptions.iter().zip(results) {
            if let Err(e) = result {
                failures += 1;
                warn!(
                    message = "could not renew a subscription",
                    filter = %subscription.filter,
                    domain = %subscription.template.domain,
                    command = %subscription.template.command,
                    error = (&e as &dyn std::error::Error)
                );
            }
        }
        info!(
            panel.id = %self.panel.id,
            renewed = subscriptions.len() - failures,
            failures,
            "subscriptions renewed"
        );
        failures
    }

    /// Release all subscriptions. Calling this on an inactive bridge does nothing.
    pub async fn deactivate(&self) {
        let mut subscriptions = self.subscriptions.lock().await;
        self.active.store(false, Ordering::Release);
        if subscriptions.is_empty() {
            debug!(panel.id = %self.panel.id, "bridge is not active");
            return;
        }
        let count = subscriptions.len();
        let failures = subscriptions.release(&*self.transport).await;
        info!(panel.id = %self.panel.id, released = count, failures, "bridge deactivated");
    }

    /// Route and translate an inbound message, then call the hub in the background.
    ///
    /// Problems with the message are logged and otherwise ignored. Returns the handle of the
    /// spawned hub call, if one was made.
    pub fn dispatch(&self, message: &InboundMessage) -> Option<JoinHandle<()>> {
        if !self.is_active() {
            debug!(topic = %message.topic, "bridge is inactive, dropping a message");
            return None;
        }
        let route = match self.router.route(&message.topic) {
            Ok(route) => route,
            Err(e) => {
                warn!(
                    message = "dropping a message on an unexpected topic",
                    error = (&e as &dyn std::error::Error)
                );
                return None;
            }
        };
        let invocation = match translate(&route, &message.payload) {
            Ok(Some(invocation)) => invocation,
            Ok(None) => {
                debug!(
                    topic = %message.topic,
                    payload = %String::from_utf8_lossy(&message.payload),
                    "payload does not map to any action"
                );
                return None;
            }
            Err(e) => {
                warn!(
                    message = "dropping a command with an invalid payload",
                    topic = %message.topic,
                    error = (&e as &dyn std::error::Error)
                );
                return None;
            }
        };
        debug!(
            entity_id = %invocation.entity_id,
            action = %invocation.action,
            parameters = ?invocation.parameters,
            "dispatching a command"
        );
        let hub = Arc::clone(&self.hub);
        Some(tokio::spawn(async move {
            if let Err(e) = hub.invoke(&invocation).await {
                warn!(
                    message = "hub service call failed",
                    entity_id = %invocation.entity_id,
                    action = %invocation.action,
                    error = (&e as &dyn std::error::Error)
                );
            }
        }))
    }
}
