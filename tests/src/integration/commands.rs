//! Command dispatch: single handler, deadlines, error propagation.

#[cfg(test)]
mod tests {
    use crate::fixtures::*;
    use async_trait::async_trait;
    use layer_bus::{
        BusConfig, BusError, Command, CommandHandler, HandlerResult, Layer, MessageKind,
        RegistrationOptions,
    };
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    struct UserService {
        next_id: AtomicU64,
    }

    #[async_trait]
    impl CommandHandler<CreateUser> for UserService {
        type Output = UserView;

        async fn handle(&self, command: Command<CreateUser>) -> HandlerResult<UserView> {
            if command.payload.name.is_empty() {
                return Err("name must not be empty".into());
            }
            Ok(UserView {
                user_id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
                name: command.payload.name,
            })
        }
    }

    fn create(name: &str) -> Command<CreateUser> {
        Command::new(Layer::Application, CreateUser { name: name.into() }).to(Layer::Domain)
    }

    #[tokio::test]
    async fn test_trait_handler_roundtrip() {
        let bus = bus_with(BusConfig::default());
        let registration = bus
            .handle_command::<CreateUser, _>(UserService {
                next_id: AtomicU64::new(0),
            })
            .unwrap();
        assert_eq!(registration.kind(), MessageKind::Command);

        let first: UserView = bus.send(create("ada")).await.unwrap();
        let second: UserView = bus.send(create("grace")).await.unwrap();
        assert_eq!(first.user_id, 1);
        assert_eq!(second, UserView { user_id: 2, name: "grace".into() });

        let snapshot = bus.metrics();
        assert_eq!(snapshot.published, 2);
        assert_eq!(snapshot.processed, 2);
        assert_eq!(snapshot.errors, 0);
    }

    #[tokio::test]
    async fn test_duplicate_registration_keeps_first_handler() {
        let bus = bus_with(BusConfig::default());
        bus.handle_command_fn(|_: Command<CreateUser>| async { HandlerResult::Ok("first") })
            .unwrap();

        let second = bus.handle_command_fn(|_: Command<CreateUser>| async { HandlerResult::Ok("second") });
        assert!(matches!(
            second,
            Err(BusError::HandlerAlreadyRegistered { kind: MessageKind::Command, .. })
        ));

        let reply: &'static str = bus.send(create("ada")).await.unwrap();
        assert_eq!(reply, "first");
        assert_eq!(bus.introspect().command_types.len(), 1);
    }

    #[tokio::test]
    async fn test_unregister_frees_slot() {
        let bus = bus_with(BusConfig::default());
        let first = bus
            .handle_command_fn(|_: Command<CreateUser>| async { HandlerResult::Ok(1u8) })
            .unwrap();
        assert!(first.unregister());
        assert!(!first.is_active());

        let missing: Result<u8, BusError> = bus.send(create("ada")).await;
        assert!(matches!(missing, Err(BusError::NoHandlerRegistered { .. })));

        bus.handle_command_fn(|_: Command<CreateUser>| async { HandlerResult::Ok(2u8) })
            .unwrap();
        let reply: u8 = bus.send(create("ada")).await.unwrap();
        assert_eq!(reply, 2);
    }

    #[tokio::test]
    async fn test_no_handler() {
        let bus = bus_with(BusConfig::default());
        let result: Result<(), BusError> = bus.send(create("ada")).await;
        match result {
            Err(BusError::NoHandlerRegistered { kind, payload_type }) => {
                assert_eq!(kind, MessageKind::Command);
                assert!(payload_type.ends_with("CreateUser"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(bus.metrics().errors, 1);
    }

    #[tokio::test]
    async fn test_handler_error_becomes_execution_failed() {
        let bus = bus_with(BusConfig::default());
        bus.handle_command::<CreateUser, _>(UserService {
            next_id: AtomicU64::new(0),
        })
        .unwrap();

        let result: Result<UserView, BusError> = bus.send(create("")).await;
        assert_eq!(
            result,
            Err(BusError::ExecutionFailed {
                reason: "name must not be empty".into()
            })
        );
    }

    #[tokio::test]
    async fn test_typed_bus_error_passes_through() {
        let bus = bus_with(BusConfig::default());
        bus.handle_command_fn(|_: Command<CreateUser>| async {
            HandlerResult::<()>::Err(BusError::type_mismatch("domain invariant").into())
        })
        .unwrap();

        let result: Result<(), BusError> = bus.send(create("ada")).await;
        assert_eq!(result, Err(BusError::type_mismatch("domain invariant")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_at_configured_deadline() {
        let bus = bus_with(BusConfig {
            default_command_timeout: Duration::from_millis(250),
            ..BusConfig::default()
        });
        bus.handle_command_fn(|_: Command<Stall>| async {
            std::future::pending::<()>().await;
            HandlerResult::Ok(())
        })
        .unwrap();

        let started = Instant::now();
        let result: Result<(), BusError> = bus.send(Command::new(Layer::Domain, Stall)).await;
        let elapsed = started.elapsed();

        assert_eq!(
            result,
            Err(BusError::Timeout {
                timeout: Duration::from_millis(250)
            })
        );
        assert!(elapsed >= Duration::from_millis(250));
        assert!(elapsed < Duration::from_millis(260));
        let snapshot = bus.metrics();
        assert_eq!(snapshot.timeouts, 1);
        assert_eq!(snapshot.errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_metadata_timeout_overrides_default() {
        let bus = bus_with(BusConfig::default());
        bus.handle_command_fn(|_: Command<Stall>| async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            HandlerResult::Ok(())
        })
        .unwrap();

        let quick: Result<(), BusError> = bus
            .send(Command::new(Layer::Domain, Stall).with_timeout(Duration::from_millis(50)))
            .await;
        assert!(matches!(quick, Err(BusError::Timeout { .. })));

        let patient: Result<(), BusError> = bus.send(Command::new(Layer::Domain, Stall)).await;
        assert!(patient.is_ok());
    }

    #[tokio::test]
    async fn test_handler_id_does_not_change_dispatch() {
        let bus = bus_with(BusConfig::default());
        bus.handle_command_with::<CreateUser, _>(
            UserService {
                next_id: AtomicU64::new(41),
            },
            RegistrationOptions::new().with_handler_id("user-service"),
        )
        .unwrap();
        let view: UserView = bus.send(create("ada")).await.unwrap();
        assert_eq!(view.user_id, 42);
    }
}
