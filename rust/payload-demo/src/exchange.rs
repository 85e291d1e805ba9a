//! Demo payload: trades random typed values with random peers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;

use payload_core::{Control, LoopContext, Message, NodeId, Payload, Result, TypedValue};

pub const PAYLOAD_NAME: &str = "pollux-payload-demo";

const MESSAGES_PER_ITERATION_OPTION: &str = "messages_per_iteration";
const MESSAGE_INTERVAL_OPTION: &str = "message_interval_ms";
const DEFAULT_MESSAGES_PER_ITERATION: u64 = 5;
const DEFAULT_MESSAGE_INTERVAL_MS: u64 = 5_000;

pub struct ExchangePayload {
    messages_per_iteration: AtomicU64,
    message_interval_ms: AtomicU64,
}

impl Default for ExchangePayload {
    fn default() -> Self {
        Self {
            messages_per_iteration: AtomicU64::new(DEFAULT_MESSAGES_PER_ITERATION),
            message_interval_ms: AtomicU64::new(DEFAULT_MESSAGE_INTERVAL_MS),
        }
    }
}

impl ExchangePayload {
    pub fn messages_per_iteration(&self) -> u64 {
        self.messages_per_iteration.load(Ordering::Relaxed)
    }

    pub fn message_interval(&self) -> Duration {
        Duration::from_millis(self.message_interval_ms.load(Ordering::Relaxed))
    }
}

/// One exchange: a destination and a value with its key.
#[derive(Debug, Clone, PartialEq)]
struct Exchange {
    peer: NodeId,
    key: &'static str,
    value: TypedValue,
}

fn pick_exchange(others: &[NodeId], rng: &mut impl Rng) -> Option<Exchange> {
    let peer = *others.choose(rng)?;
    let (key, value) = match rng.gen_range(0..5) {
        0 => ("int64", TypedValue::Int64(rng.gen_range(0..i64::from(i32::MAX)))),
        1 => ("uint64", TypedValue::Uint64(rng.gen_range(0..u64::from(u32::MAX)))),
        2 => (
            "int64array",
            TypedValue::Int64Array(vec![0, 10, 200, 3000, 40000, 500000]),
        ),
        3 => (
            "doublearray",
            TypedValue::DoubleArray((0..4).map(|_| rng.gen::<f64>()).collect()),
        ),
        _ => ("string", TypedValue::Str("value".to_string())),
    };
    Some(Exchange { peer, key, value })
}

#[async_trait]
impl Payload for ExchangePayload {
    fn name(&self) -> &str {
        PAYLOAD_NAME
    }

    async fn on_control(&self, control: &Control) -> Result<()> {
        let messages =
            control.count_or(MESSAGES_PER_ITERATION_OPTION, DEFAULT_MESSAGES_PER_ITERATION)?;
        let interval = control.count_or(MESSAGE_INTERVAL_OPTION, DEFAULT_MESSAGE_INTERVAL_MS)?;
        self.messages_per_iteration.store(messages, Ordering::Relaxed);
        self.message_interval_ms.store(interval, Ordering::Relaxed);

        tracing::info!(
            "Exchanging {} messages per iteration, every {}ms",
            messages,
            interval
        );
        Ok(())
    }

    async fn on_loop(&self, ctx: &LoopContext) -> Result<()> {
        tracing::info!(
            "Main loop started iteration: {} synchronized: {}",
            ctx.iteration(),
            ctx.is_synchronized()
        );

        let budget = self.messages_per_iteration();
        let interval = self.message_interval();
        let mut sent = 0u64;

        while !ctx.is_synchronized() || sent < budget {
            tokio::time::sleep(interval).await;

            let picked = {
                let mut rng = rand::thread_rng();
                pick_exchange(ctx.others(), &mut rng)
            };
            let Some(exchange) = picked else {
                tracing::warn!("No other participant to exchange with");
                break;
            };

            let status = ctx.node_status(exchange.peer).await;
            tracing::debug!("Node {} is {:?}", exchange.peer, status);

            let mirrored = exchange.value.to_string();
            ctx.transmit_to(exchange.peer, exchange.key, exchange.value).await?;
            ctx.log(&exchange.peer.to_string(), &mirrored).await?;

            sent += 1;
            ctx.report("messages", &sent.to_string()).await?;
            tracing::info!("Message {} ({}) sent to {}", sent, exchange.key, exchange.peer);
        }

        if !ctx.is_synchronized() {
            ctx.cancelled().await;
        }
        Ok(())
    }

    async fn on_message(&self, message: Message) {
        tracing::info!(
            "Pollux Message received: origin={} key={}, value={}",
            message.origin,
            message.key,
            message.value
        );
    }
}
