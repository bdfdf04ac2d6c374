use std::collections::VecDeque;

use agent_provider::{DeltaStream, ProviderError, StreamDelta};
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use provider_api::ApiError;

/// Turns one protocol's events into shared deltas.
pub(crate) trait EventDecoder<E>: Send + 'static {
    fn decode(&mut self, event: E) -> Result<Vec<StreamDelta>, ProviderError>;

    /// Called when the event stream ends without a `TurnComplete`.
    fn finish(&mut self) -> Result<Vec<StreamDelta>, ProviderError>;
}

struct DecodeState<E, D> {
    events: BoxStream<'static, Result<E, ApiError>>,
    decoder: D,
    pending: VecDeque<StreamDelta>,
    done: bool,
}

/// Drives `decoder` over `events`. The output ends after the first
/// `TurnComplete` or the first error.
pub(crate) fn decode_events<E, D>(events: BoxStream<'static, Result<E, ApiError>>, decoder: D) -> DeltaStream
where
    E: Send + 'static,
    D: EventDecoder<E>,
{
    let state = DecodeState {
        events,
        decoder,
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(delta) = state.pending.pop_front() {
                if matches!(delta, StreamDelta::TurnComplete { .. }) {
                    state.done = true;
                    state.pending.clear();
                }
                return Some((Ok(delta), state));
            }
            if state.done {
                return None;
            }

            match state.events.next().await {
                Some(Ok(event)) => match state.decoder.decode(event) {
                    Ok(deltas) => state.pending.extend(deltas),
                    Err(error) => {
                        state.done = true;
                        return Some((Err(error), state));
                    }
                },
                Some(Err(error)) => {
                    state.done = true;
                    return Some((Err(ProviderError::from(error)), state));
                }
                None => {
                    state.done = true;
                    match state.decoder.finish() {
                        Ok(deltas) => state.pending.extend(deltas),
                        Err(error) => return Some((Err(error), state)),
                    }
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use agent_provider::{ProviderError, StreamDelta};
    use assert_matches::assert_matches;
    use futures_util::{stream, StreamExt};
    use provider_api::ApiError;

    use super::{decode_events, EventDecoder};

    struct Echo {
        finished: bool,
    }

    impl EventDecoder<&'static str> for Echo {
        fn decode(&mut self, event: &'static str) -> Result<Vec<StreamDelta>, ProviderError> {
            Ok(match event {
                "done" => vec![StreamDelta::TurnComplete { stop_reason: None }],
                "bad" => return Err(ProviderError::decode("bad event")),
                text => vec![StreamDelta::TextDelta { text: text.to_string() }],
            })
        }

        fn finish(&mut self) -> Result<Vec<StreamDelta>, ProviderError> {
            self.finished = true;
            Err(ProviderError::Stream {
                message: "ended early".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn output_stops_after_turn_complete() {
        let events = stream::iter(vec![Ok("a"), Ok("done"), Ok("ignored")]).boxed();
        let deltas: Vec<_> = decode_events(events, Echo { finished: false }).collect().await;

        assert_eq!(deltas.len(), 2);
        assert_matches!(deltas.last(), Some(Ok(StreamDelta::TurnComplete { .. })));
    }

    #[tokio::test]
    async fn early_end_and_transport_errors_surface_once() {
        let events = stream::iter(vec![Ok("a")]).boxed();
        let deltas: Vec<_> = decode_events(events, Echo { finished: false }).collect().await;
        assert_matches!(deltas.last(), Some(Err(ProviderError::Stream { .. })));

        let events = stream::iter(vec![Err(ApiError::Truncated), Ok("a")]).boxed();
        let deltas: Vec<_> = decode_events(events, Echo { finished: false }).collect().await;
        assert_eq!(deltas.len(), 1);
        assert_matches!(deltas[0], Err(ProviderError::Decode { .. }));
    }
}
