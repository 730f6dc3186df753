use std::{future::Future, sync::Arc, time::Duration};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    api::error,
    modules::{
        conversation::repository::DirectChannelProvisioner,
        notification::{
            event::{FriendPayload, RelationshipEvent},
            notifier::Notifier,
        },
        relationship::{
            model::{Effect, IntentKind, Transition},
            schema::PairKey,
        },
        user::repository::UserRepository,
    },
};

/// Sending half handed to the resolver. Dispatch never waits on delivery.
#[derive(Clone)]
pub struct FanoutQueue {
    sender: mpsc::UnboundedSender<Transition>,
}

impl FanoutQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Transition>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn dispatch(&self, transition: Transition) {
        if let Err(mpsc::error::SendError(dropped)) = self.sender.send(transition) {
            log::error!(
                "Fanout worker is gone, dropping {:?} transition by {} on {}",
                dropped.intent,
                dropped.actor,
                dropped.counterpart
            );
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub recipient: Uuid,
    pub event: RelationshipEvent,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct FanoutPlan {
    pub deliveries: Vec<Delivery>,
    pub provision_dm: Option<PairKey>,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    pub failed: usize,
    pub dm_provisioned: bool,
}

/// Expands committed transitions into per-user events and DM provisioning.
///
/// Failures here are logged and retried, never reported back to the intent
/// that produced the transition.
#[derive(Clone)]
pub struct NotificationFanout {
    user_repo: Arc<dyn UserRepository + Send + Sync>,
    notifier: Arc<dyn Notifier>,
    provisioner: Arc<dyn DirectChannelProvisioner>,
    retry: RetryPolicy,
}

impl NotificationFanout {
    pub fn with_dependencies(
        user_repo: Arc<dyn UserRepository + Send + Sync>,
        notifier: Arc<dyn Notifier>,
        provisioner: Arc<dyn DirectChannelProvisioner>,
        retry: RetryPolicy,
    ) -> Self {
        log::info!(
            "NotificationFanout initialized ({} attempt(s), {:?} backoff)",
            retry.max_attempts,
            retry.backoff
        );
        NotificationFanout { user_repo, notifier, provisioner, retry }
    }

    pub fn spawn(self, receiver: mpsc::UnboundedReceiver<Transition>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(receiver))
    }

    /// Processes transitions in commit order until every `FanoutQueue` is dropped.
    pub async fn run(self, mut receiver: mpsc::UnboundedReceiver<Transition>) {
        log::info!("Notification fanout worker started");

        while let Some(transition) = receiver.recv().await {
            let intent = transition.intent;
            let report = self.process(transition).await;
            log::debug!(
                "Fanout {:?}: {} delivered, {} failed, dm provisioned: {}",
                intent,
                report.delivered,
                report.failed,
                report.dm_provisioned
            );
        }

        log::info!("Notification fanout worker stopped");
    }

    pub async fn process(&self, transition: Transition) -> FanoutReport {
        let plan = self.plan(&transition).await;
        let mut report = FanoutReport::default();

        if let Some(pair) = plan.provision_dm {
            let provisioned = self
                .with_retry("DM provisioning", || self.provisioner.ensure_exists(&pair.low, &pair.high))
                .await;
            if let Ok(conversation_id) = provisioned {
                log::debug!("Direct conversation {} ready for pair {}", conversation_id, pair);
                report.dm_provisioned = true;
            }
        }

        for delivery in &plan.deliveries {
            let delivered = self
                .with_retry(delivery.event.event_type(), || {
                    self.notifier.deliver(&delivery.recipient, &delivery.event)
                })
                .await;
            match delivered {
                Ok(()) => report.delivered += 1,
                Err(_) => report.failed += 1,
            }
        }

        report
    }

    /// Notifications owed for a transition, in effect order.
    pub async fn plan(&self, transition: &Transition) -> FanoutPlan {
        let actor = transition.actor;
        let counterpart = transition.counterpart;
        let mut plan = FanoutPlan::default();

        for effect in &transition.effects {
            match effect {
                Effect::RequestCreated(request) => plan.deliveries.push(Delivery {
                    recipient: request.to_user_id,
                    event: RelationshipEvent::RequestNew { request: request.clone() },
                }),
                Effect::RequestAccepted { friendship, .. } => {
                    // Profile is read now, not at intent time.
                    let profile =
                        self.with_retry("profile lookup", || self.user_repo.find_profile(&actor)).await;
                    match profile {
                        Ok(Some(user)) => plan.deliveries.push(Delivery {
                            recipient: counterpart,
                            event: RelationshipEvent::RequestAccepted {
                                friend: FriendPayload { friendship: friendship.clone(), user },
                            },
                        }),
                        Ok(None) => log::warn!(
                            "Profile of {} not found, skipping accept notification to {}",
                            actor,
                            counterpart
                        ),
                        Err(_) => {}
                    }
                    plan.provision_dm = Some(friendship.pair());
                }
                Effect::RequestRemoved { request, reason } => {
                    let recipient = if request.from_user_id == actor {
                        request.to_user_id
                    } else {
                        request.from_user_id
                    };
                    plan.deliveries.push(Delivery {
                        recipient,
                        event: RelationshipEvent::RequestDeclined {
                            request_id: request.id,
                            user_id: actor,
                            reason: *reason,
                        },
                    });
                }
                Effect::FriendshipRemoved(friendship) => {
                    plan.deliveries.push(Delivery {
                        recipient: friendship.other(&actor),
                        event: RelationshipEvent::FriendRemoved { user_id: actor },
                    });
                    // Self-sync for the remover's other sessions. A blocker gets nothing.
                    if transition.intent == IntentKind::RemoveFriend {
                        plan.deliveries.push(Delivery {
                            recipient: actor,
                            event: RelationshipEvent::FriendRemoved {
                                user_id: friendship.other(&actor),
                            },
                        });
                    }
                }
                Effect::BlockCreated(_) | Effect::BlockRemoved(_) => {}
            }
        }

        plan
    }

    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, error::SystemError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, error::SystemError>>,
    {
        let mut attempt: u32 = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.retry.max_attempts => {
                    log::warn!(
                        "{} failed (attempt {}/{}): {}",
                        what,
                        attempt,
                        self.retry.max_attempts,
                        err
                    );
                    tokio::time::sleep(self.retry.backoff * attempt).await;
                    attempt += 1;
                }
                Err(err) => {
                    log::error!("{} failed after {} attempt(s): {}", what, attempt, err);
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::relationship::{
        model::DeclineReason,
        schema::{canonical_pair_key, BlockEntity, FriendRequestEntity, FriendshipEntity, RelationshipState},
    };
    use crate::test::Harness;

    fn friendship(a: Uuid, b: Uuid) -> FriendshipEntity {
        let pair = canonical_pair_key(a, b);
        FriendshipEntity {
            user_low_id: pair.low,
            user_high_id: pair.high,
            created_at: chrono::Utc::now(),
        }
    }

    fn request(from: Uuid, to: Uuid) -> FriendRequestEntity {
        FriendRequestEntity {
            id: Uuid::now_v7(),
            from_user_id: from,
            to_user_id: to,
            message: None,
            created_at: chrono::Utc::now(),
        }
    }

    fn transition(actor: Uuid, counterpart: Uuid, intent: IntentKind, effects: Vec<Effect>) -> Transition {
        Transition {
            actor,
            counterpart,
            intent,
            before: RelationshipState::None,
            after: RelationshipState::None,
            effects,
        }
    }

    #[tokio::test]
    async fn test_block_is_silent_but_purges_are_visible() {
        let harness = Harness::new();
        let (a, b) = (harness.user("alice"), harness.user("bob"));

        let plan = harness
            .fanout
            .plan(&transition(
                a,
                b,
                IntentKind::Block,
                vec![
                    Effect::FriendshipRemoved(friendship(a, b)),
                    Effect::BlockCreated(BlockEntity {
                        blocker_id: a,
                        blocked_id: b,
                        created_at: chrono::Utc::now(),
                    }),
                ],
            ))
            .await;

        assert_eq!(
            plan.deliveries,
            vec![Delivery { recipient: b, event: RelationshipEvent::FriendRemoved { user_id: a } }]
        );
        assert!(plan.provision_dm.is_none());
    }

    #[tokio::test]
    async fn test_block_purging_incoming_request_reads_as_rejection() {
        let harness = Harness::new();
        let (a, b) = (harness.user("alice"), harness.user("bob"));
        let pending = request(b, a);

        let plan = harness
            .fanout
            .plan(&transition(
                a,
                b,
                IntentKind::Block,
                vec![Effect::RequestRemoved { request: pending.clone(), reason: DeclineReason::Rejected }],
            ))
            .await;

        assert_eq!(
            plan.deliveries,
            vec![Delivery {
                recipient: b,
                event: RelationshipEvent::RequestDeclined {
                    request_id: pending.id,
                    user_id: a,
                    reason: DeclineReason::Rejected,
                },
            }]
        );
    }

    #[tokio::test]
    async fn test_remove_friend_syncs_both_sides() {
        let harness = Harness::new();
        let (a, b) = (harness.user("alice"), harness.user("bob"));

        let plan = harness
            .fanout
            .plan(&transition(
                a,
                b,
                IntentKind::RemoveFriend,
                vec![Effect::FriendshipRemoved(friendship(a, b))],
            ))
            .await;

        assert_eq!(
            plan.deliveries,
            vec![
                Delivery { recipient: b, event: RelationshipEvent::FriendRemoved { user_id: a } },
                Delivery { recipient: a, event: RelationshipEvent::FriendRemoved { user_id: b } },
            ]
        );
    }

    #[tokio::test]
    async fn test_accept_uses_profile_at_fanout_time() {
        let harness = Harness::new();
        let (a, b) = (harness.user("alice"), harness.user("bob"));
        let accepted = transition(
            b,
            a,
            IntentKind::AcceptRequest,
            vec![Effect::RequestAccepted { request: request(a, b), friendship: friendship(a, b) }],
        );

        harness.profiles.rename(&b, "Robert");
        let report = harness.fanout.process(accepted).await;

        assert_eq!(report, FanoutReport { delivered: 1, failed: 0, dm_provisioned: true });
        assert!(harness.notifier.for_user(&b).is_empty());
        match harness.notifier.for_user(&a).as_slice() {
            [RelationshipEvent::RequestAccepted { friend }] => {
                assert_eq!(friend.user.id, b);
                assert_eq!(friend.user.display_name, "Robert");
            }
            other => panic!("Expected one accepted event, got {:?}", other),
        }
        assert_eq!(harness.provisioner.calls(), vec![canonical_pair_key(a, b)]);
    }

    #[tokio::test]
    async fn test_dm_failure_is_retried_and_never_blocks_delivery() {
        let harness = Harness::new();
        let (a, b) = (harness.user("alice"), harness.user("bob"));
        let accepted = || {
            transition(
                b,
                a,
                IntentKind::AcceptRequest,
                vec![Effect::RequestAccepted { request: request(a, b), friendship: friendship(a, b) }],
            )
        };

        harness.provisioner.fail_next(2);
        let report = harness.fanout.process(accepted()).await;
        assert!(report.dm_provisioned);
        assert_eq!(harness.provisioner.calls().len(), 3);

        harness.provisioner.fail_next(10);
        let report = harness.fanout.process(accepted()).await;
        assert!(!report.dm_provisioned);
        assert_eq!(report.delivered, 1);
        assert_eq!(harness.notifier.for_user(&a).len(), 2);
    }

    #[tokio::test]
    async fn test_notifier_failure_is_retried() {
        let harness = Harness::new();
        let (a, b) = (harness.user("alice"), harness.user("bob"));

        harness.notifier.fail_next(1);
        let report = harness
            .fanout
            .process(transition(
                a,
                b,
                IntentKind::SendRequest,
                vec![Effect::RequestCreated(request(a, b))],
            ))
            .await;

        assert_eq!(report, FanoutReport { delivered: 1, failed: 0, dm_provisioned: false });
        assert_eq!(harness.notifier.for_user(&b).len(), 1);
    }

    #[tokio::test]
    async fn test_worker_drains_queue_until_closed() {
        let harness = Harness::new();
        let (a, b) = (harness.user("alice"), harness.user("bob"));
        let (queue, receiver) = FanoutQueue::channel();
        let worker = harness.fanout.clone().spawn(receiver);

        queue.dispatch(transition(
            a,
            b,
            IntentKind::SendRequest,
            vec![Effect::RequestCreated(request(a, b))],
        ));
        queue.dispatch(transition(
            a,
            b,
            IntentKind::RemoveFriend,
            vec![Effect::FriendshipRemoved(friendship(a, b))],
        ));
        drop(queue);
        worker.await.unwrap();

        let events: Vec<&'static str> =
            harness.notifier.for_user(&b).iter().map(RelationshipEvent::event_type).collect();
        assert_eq!(events, vec!["friend.request.new", "friend.removed"]);
        assert_eq!(harness.notifier.for_user(&a).len(), 1);
    }
}
