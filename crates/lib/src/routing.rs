//! Message routing: classify, answer with the responder or the agent, deliver.

use std::sync::Arc;
use std::time::Duration;

use crate::agent::Agent;
use crate::channels::EventOrigin;
use crate::classifier::{Classifier, Intent};
use crate::dispatch::{DeliveryTarget, Dispatcher, ResponseDraft};
use crate::gateway::AuthorizedMessage;
use crate::responder::Responder;
use crate::tools::ToolRegistry;

/// Stateless apart from its shared services; one instance serves every entry point.
pub struct MessageRouter {
    classifier: Classifier,
    responder: Arc<Responder>,
    agent: Arc<Agent>,
    tools: ToolRegistry,
    dispatcher: Arc<Dispatcher>,
    agent_timeout: Duration,
    reply_targets: Vec<DeliveryTarget>,
}

impl MessageRouter {
    pub fn new(
        classifier: Classifier,
        responder: Arc<Responder>,
        agent: Arc<Agent>,
        tools: ToolRegistry,
        dispatcher: Arc<Dispatcher>,
        agent_timeout: Duration,
    ) -> Self {
        Self {
            classifier,
            responder,
            agent,
            tools,
            dispatcher,
            agent_timeout,
            reply_targets: vec![DeliveryTarget::Bridge],
        }
    }

    /// Where live replies go (default: the bridge).
    pub fn with_reply_targets(mut self, targets: Vec<DeliveryTarget>) -> Self {
        self.reply_targets = targets;
        self
    }

    pub async fn classify(&self, text: &str) -> Intent {
        match self.classifier.classify(text).await {
            Ok(intent) => intent,
            Err(e) => {
                log::warn!("routing: {}; answering as a data query", e);
                Intent::DataQuery
            }
        }
    }

    /// Answer `text` without delivering it.
    pub async fn route(&self, text: &str) -> ResponseDraft {
        let intent = self.classify(text).await;
        self.answer(text, intent).await
    }

    async fn answer(&self, text: &str, intent: Intent) -> ResponseDraft {
        log::info!("routing: intent {}", intent.as_str());
        let reply = match intent {
            Intent::DataQuery => self.responder.respond(text).await,
            Intent::ToolAction => self.agent.run(text, &self.tools, self.agent_timeout).await,
        };
        ResponseDraft::new(reply, self.reply_targets.iter().copied())
    }

    /// Route one accepted message and deliver the reply. Chat-platform messages are
    /// answered in their own channel, everything else goes to the reply targets. Never
    /// fails; delivery errors are logged.
    pub async fn handle(&self, mut msg: AuthorizedMessage) {
        let id = uuid::Uuid::new_v4();
        log::info!("routing: [{}] message from {}", id, msg.event.sender_address);
        let intent = self.classify(&msg.text).await;
        msg.intent = Some(intent);
        let draft = self.answer(&msg.text, intent).await;
        if draft.text.trim().is_empty() {
            log::warn!("routing: [{}] empty reply, nothing sent", id);
            return;
        }
        let delivered = match (msg.event.origin, msg.event.chat_id.as_deref()) {
            (EventOrigin::ChatPlatform, Some(channel)) => {
                self.dispatcher.reply_in_channel(channel, &draft.text).await
            }
            _ => self.dispatcher.deliver_draft(draft).await,
        };
        match delivered {
            Ok(()) => log::info!("routing: [{}] reply delivered", id),
            Err(e) => log::error!("routing: [{}] delivery failed: {}", id, e),
        }
    }
}
