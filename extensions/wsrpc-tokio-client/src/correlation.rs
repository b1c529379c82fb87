use serde_json::Value;
use std::collections::VecDeque;
use tokio::sync::oneshot;

/// How an inbound message relates to the requests waiting for a response.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Inbound {
    /// A response (or batch of responses) carrying ids.
    Keyed(String),
    /// A server-initiated notification; never a response.
    Notification,
    /// Anything else: no usable ids. `batch` is set for array responses.
    Unkeyed { batch: bool },
}

/// The correlation key of a request or response: the `id` of a single
/// object, or the sorted ids of a batch joined with `,`. Batch elements can
/// come back in any order, so sorting makes both sides agree.
pub(crate) fn correlation_key(value: &Value) -> Option<String> {
    match value {
        Value::Object(object) => object
            .get("id")
            .filter(|id| !id.is_null())
            .map(Value::to_string),
        Value::Array(elements) if !elements.is_empty() => {
            let mut ids = elements
                .iter()
                .map(|element| {
                    element
                        .get("id")
                        .filter(|id| !id.is_null())
                        .map(Value::to_string)
                })
                .collect::<Option<Vec<_>>>()?;
            ids.sort_unstable();
            Some(ids.join(","))
        }
        _ => None,
    }
}

pub(crate) fn classify_inbound(text: &str) -> Inbound {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return Inbound::Unkeyed { batch: false };
    };

    if let Some(key) = correlation_key(&value) {
        return Inbound::Keyed(key);
    }

    match &value {
        Value::Object(object) if object.contains_key("method") => Inbound::Notification,
        Value::Array(_) => Inbound::Unkeyed { batch: true },
        _ => Inbound::Unkeyed { batch: false },
    }
}

struct PendingResponse {
    key: Option<String>,
    batch: bool,
    responder: oneshot::Sender<String>,
}

/// Requests waiting for their response, oldest first.
#[derive(Default)]
pub(crate) struct PendingResponses {
    waiting: VecDeque<PendingResponse>,
}

impl PendingResponses {
    /// Registers the request `payload` and returns where its response will
    /// be delivered.
    pub(crate) fn register_request(&mut self, payload: &str) -> oneshot::Receiver<String> {
        let request = serde_json::from_str::<Value>(payload).ok();
        let key = request.as_ref().and_then(correlation_key);
        let batch = matches!(request, Some(Value::Array(_)));
        self.register(key, batch)
    }

    pub(crate) fn register(
        &mut self,
        key: Option<String>,
        batch: bool,
    ) -> oneshot::Receiver<String> {
        let (responder, response) = oneshot::channel();
        self.waiting.push_back(PendingResponse {
            key,
            batch,
            responder,
        });
        response
    }

    /// Hands `text` to the request it answers. Returns `false` when nobody
    /// was waiting for it.
    ///
    /// Keyed responses go to the request with the same key. A response that
    /// matches nothing goes to the oldest request that had no id itself.
    /// Failing that, an unkeyed response only goes to a keyed request when
    /// the choice is unambiguous: it is the only request waiting, or it is a
    /// single object (a node rejecting a whole envelope) and exactly one
    /// batch is waiting.
    pub(crate) fn resolve(&mut self, text: String) -> bool {
        let oldest_unkeyed = || self.waiting.iter().position(|pending| pending.key.is_none());

        let position = match classify_inbound(&text) {
            Inbound::Keyed(key) => self
                .waiting
                .iter()
                .position(|pending| pending.key.as_deref() == Some(key.as_str()))
                .or_else(oldest_unkeyed),
            Inbound::Unkeyed { batch } => oldest_unkeyed()
                .or_else(|| (self.waiting.len() == 1).then_some(0))
                .or_else(|| (!batch).then(|| self.only_waiting_batch()).flatten()),
            Inbound::Notification => None,
        };

        match position.and_then(|position| self.waiting.remove(position)) {
            // The caller may have stopped waiting; that still counts as routed.
            Some(pending) => {
                let _ = pending.responder.send(text);
                true
            }
            None => false,
        }
    }

    fn only_waiting_batch(&self) -> Option<usize> {
        let mut batches = self
            .waiting
            .iter()
            .enumerate()
            .filter(|(_, pending)| pending.batch)
            .map(|(position, _)| position);

        match (batches.next(), batches.next()) {
            (Some(position), None) => Some(position),
            _ => None,
        }
    }

    /// Drops every waiting request; their receivers observe an error.
    pub(crate) fn fail_all(&mut self) {
        self.waiting.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.waiting.len()
    }
}
