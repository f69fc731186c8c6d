//! Counters, latency samples and trace records reaching a metrics sink.

#[cfg(test)]
mod tests {
    use crate::fixtures::*;
    use bus_telemetry::{encode_metrics, register_metrics, PrometheusSink};
    use layer_bus::{
        BusConfig, BusCounter, BusError, Command, Event, HandlerResult, Layer, MessageBus,
        MessageKind, Query, TraceOutcome,
    };
    use std::sync::Arc;
    use std::time::Duration;

    fn traced() -> BusConfig {
        BusConfig {
            enable_tracing: true,
            ..short_timeouts()
        }
    }

    #[tokio::test]
    async fn test_event_trace_and_counters() {
        let (bus, sink) = recorded_bus(traced());
        let _ok = bus.subscribe_fn(|_: Event<UserCreated>| async { HandlerResult::Ok(()) });
        let _err = bus.subscribe_fn(|_: Event<UserCreated>| async {
            HandlerResult::<()>::Err("boom".into())
        });

        let event = Event::new(Layer::Domain, user_created(1)).with_correlation_id("flow-7");
        let message_id = event.id();
        assert_eq!(bus.publish(event).await, 1);

        let traces = sink.traces.lock().clone();
        assert_eq!(traces.len(), 1);
        let trace = &traces[0];
        assert_eq!(trace.message_id, message_id);
        assert_eq!(trace.correlation_id, "flow-7");
        assert_eq!(trace.kind, MessageKind::Event);
        assert_eq!(trace.handler_count, 2);
        assert_eq!(trace.outcome, TraceOutcome::Delivered { handled: 1 });

        assert_eq!(sink.total(BusCounter::Published), 1);
        assert_eq!(sink.total(BusCounter::Processed), 1);
        assert_eq!(sink.total(BusCounter::Errors), 1);
        assert_eq!(sink.handler_counts.lock().len(), 1);
        assert_eq!(sink.handler_counts.lock()[0].1, 2);
        assert_eq!(sink.latencies.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_sink_totals_match_snapshot() {
        let (bus, sink) = recorded_bus(traced());
        bus.handle_command_fn(|_: Command<CreateUser>| async { HandlerResult::Ok(()) })
            .unwrap();
        bus.handle_query_fn(|q: Query<GetUser, UserView>| async move {
            HandlerResult::Ok(UserView {
                user_id: q.payload.user_id,
                name: String::new(),
            })
        })
        .unwrap();

        for _ in 0..3 {
            let _: () = bus
                .send(Command::new(Layer::Application, CreateUser { name: "a".into() }))
                .await
                .unwrap();
            bus.query(
                Query::<GetUser, UserView>::new(Layer::Application, GetUser { user_id: 1 })
                    .with_cache_key("u1"),
            )
            .await
            .unwrap();
        }
        let rejected: Result<(), BusError> = bus
            .send(Command::new(Layer::Domain, CreateUser { name: "a".into() }).to(Layer::External))
            .await;
        assert!(rejected.is_err());

        let snapshot = bus.metrics();
        assert_eq!(sink.total(BusCounter::Published), snapshot.published);
        assert_eq!(sink.total(BusCounter::Processed), snapshot.processed);
        assert_eq!(sink.total(BusCounter::CacheHits), snapshot.cache_hits);
        assert_eq!(sink.total(BusCounter::CacheMisses), snapshot.cache_misses);
        assert_eq!(sink.total(BusCounter::RoutingViolations), snapshot.routing_violations);
        assert_eq!(snapshot.published, 7);
        assert_eq!(snapshot.cache_hits, 2);
        assert_eq!(snapshot.routing_violations, 1);

        let outcomes: Vec<TraceOutcome> = sink
            .traces
            .lock()
            .iter()
            .map(|t| t.outcome.clone())
            .collect();
        assert_eq!(
            outcomes.iter().filter(|o| **o == TraceOutcome::CacheHit).count(),
            2
        );
        assert_eq!(
            outcomes.iter().filter(|o| **o == TraceOutcome::Completed).count(),
            4
        );
        assert_eq!(outcomes.last(), Some(&TraceOutcome::Rejected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_and_timeout_traces() {
        let (bus, sink) = recorded_bus(traced());
        bus.handle_command_fn(|_: Command<CreateUser>| async {
            HandlerResult::<()>::Err("quota exceeded".into())
        })
        .unwrap();
        bus.handle_command_fn(|_: Command<Stall>| async {
            std::future::pending::<()>().await;
            HandlerResult::Ok(())
        })
        .unwrap();

        let failed: Result<(), BusError> = bus
            .send(Command::new(Layer::Domain, CreateUser { name: "a".into() }))
            .await;
        assert!(failed.is_err());
        let timed_out: Result<(), BusError> = bus
            .send(Command::new(Layer::Domain, Stall).with_timeout(Duration::from_millis(20)))
            .await;
        assert!(matches!(timed_out, Err(BusError::Timeout { .. })));

        let traces = sink.traces.lock().clone();
        assert_eq!(traces.len(), 2);
        match &traces[0].outcome {
            TraceOutcome::Failed { reason } => assert!(reason.contains("quota exceeded")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(traces[1].outcome, TraceOutcome::TimedOut);
        assert_eq!(sink.total(BusCounter::Timeouts), 1);
        assert_eq!(sink.total(BusCounter::Errors), 2);
    }

    #[tokio::test]
    async fn test_disabled_metrics_reach_nothing() {
        let (bus, sink) = recorded_bus(BusConfig {
            enable_metrics: false,
            enable_tracing: false,
            ..BusConfig::default()
        });
        let _sub = bus.subscribe_fn(|_: Event<UserCreated>| async { HandlerResult::Ok(()) });
        assert_eq!(bus.publish(Event::new(Layer::Domain, user_created(1))).await, 1);

        assert_eq!(bus.metrics(), Default::default());
        assert!(sink.increments.lock().is_empty());
        assert!(sink.latencies.lock().is_empty());
        assert!(sink.handler_counts.lock().is_empty());
        assert!(sink.traces.lock().is_empty());
    }

    #[tokio::test]
    async fn test_tracing_independent_of_metrics() {
        let (bus, sink) = recorded_bus(BusConfig {
            enable_metrics: false,
            enable_tracing: true,
            ..BusConfig::default()
        });
        assert_eq!(bus.publish(Event::new(Layer::Domain, user_created(1))).await, 0);
        assert!(sink.increments.lock().is_empty());
        assert_eq!(sink.traces.lock().len(), 1);
    }

    #[derive(Debug, Clone)]
    struct ExportProbe;

    #[tokio::test]
    async fn test_prometheus_export() {
        register_metrics().unwrap();
        let bus = MessageBus::builder()
            .metrics_sink(Arc::new(PrometheusSink::new()))
            .build()
            .unwrap();
        let _sub = bus.subscribe_fn(|_: Event<ExportProbe>| async { HandlerResult::Ok(()) });
        bus.publish(Event::new(Layer::Domain, ExportProbe)).await;

        let text = encode_metrics().unwrap();
        assert!(text.contains("layer_bus_messages_total"));
        assert!(text.contains("ExportProbe"));
    }
}
