//! Many callers hitting one bus from a multi-threaded runtime.

#[cfg(test)]
mod tests {
    use crate::fixtures::*;
    use futures::future::join_all;
    use layer_bus::{BusConfig, Command, Event, HandlerResult, Layer, Query};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publish() {
        let bus = bus_with(short_timeouts());
        let calls = Calls::default();
        for _ in 0..4 {
            let seen = calls.clone();
            let _sub = bus.subscribe_fn(move |_: Event<UserCreated>| {
                let seen = seen.clone();
                async move {
                    tokio::task::yield_now().await;
                    seen.hit();
                    HandlerResult::Ok(())
                }
            });
        }

        let publishes = (0..50).map(|i| {
            let bus = bus.clone();
            tokio::spawn(async move { bus.publish(Event::new(Layer::Domain, user_created(i))).await })
        });
        let handled: usize = join_all(publishes)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .sum();

        assert_eq!(handled, 200);
        assert_eq!(calls.count(), 200);
        let snapshot = bus.metrics();
        assert_eq!(snapshot.published, 50);
        assert_eq!(snapshot.processed, 200);
        assert_eq!(snapshot.errors, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_commands() {
        let bus = bus_with(short_timeouts());
        bus.handle_command_fn(|cmd: Command<CreateUser>| async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            HandlerResult::Ok(cmd.payload.name.len())
        })
        .unwrap();

        let sends = (0..100).map(|i| {
            let bus = bus.clone();
            tokio::spawn(async move {
                let name = "x".repeat(i % 7 + 1);
                let len: usize = bus
                    .send(Command::new(Layer::Application, CreateUser { name }).to(Layer::Domain))
                    .await
                    .unwrap();
                (i, len)
            })
        });

        for joined in join_all(sends).await {
            let (i, len) = joined.unwrap();
            assert_eq!(len, i % 7 + 1);
        }
        assert_eq!(bus.metrics().processed, 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cached_queries() {
        let bus = bus_with(short_timeouts());
        let calls = Calls::default();
        let seen = calls.clone();
        bus.handle_query_fn(move |q: Query<GetUser, UserView>| {
            let seen = seen.clone();
            async move {
                seen.hit();
                HandlerResult::Ok(UserView {
                    user_id: q.payload.user_id,
                    name: "shared".into(),
                })
            }
        })
        .unwrap();

        let queries = (0..100).map(|_| {
            let bus = bus.clone();
            tokio::spawn(async move {
                bus.query(
                    Query::<GetUser, UserView>::new(Layer::Application, GetUser { user_id: 1 })
                        .with_cache_key("user:1"),
                )
                .await
                .unwrap()
            })
        });

        for joined in join_all(queries).await {
            let response = joined.unwrap();
            assert!(response.success);
            assert_eq!(response.payload.name, "shared");
        }

        // Racing misses may each call the handler; every call is accounted for.
        let snapshot = bus.metrics();
        assert!(calls.count() >= 1);
        assert_eq!(snapshot.cache_hits + snapshot.cache_misses, 100);
        assert_eq!(snapshot.cache_misses as usize, calls.count());
        assert_eq!(bus.cache_statistics().entries, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_registration_races_with_publish() {
        let bus = bus_with(short_timeouts());

        let registrations = (0..20).map(|_| {
            let bus = bus.clone();
            tokio::spawn(async move {
                bus.subscribe_fn(|_: Event<UserCreated>| async { HandlerResult::Ok(()) })
            })
        });
        let publishes = (0..20).map(|i| {
            let bus = bus.clone();
            tokio::spawn(async move { bus.publish(Event::new(Layer::Domain, user_created(i))).await })
        });

        let (registered, published) = futures::join!(join_all(registrations), join_all(publishes));
        let registered: Vec<_> = registered.into_iter().map(|r| r.unwrap()).collect();
        for handled in published {
            assert!(handled.unwrap() <= 20);
        }

        assert_eq!(bus.introspect().total_count, 20);
        for registration in &registered {
            assert!(registration.unregister());
        }
        assert_eq!(bus.introspect().total_count, 0);
    }
}
