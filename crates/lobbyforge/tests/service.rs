//! Integration tests for the lobby service and its async handle.

use lobbyforge::protocol::{
    JobId, MemberId, MemberSnapshot, OnlineId, PlatformErrorCode, PlatformEvent, PlatformRequest,
    PlatformResponse, RequestId, RoomId, RoomSnapshot, ServerId, WebJob, WorldId, WorldInfo,
};
use lobbyforge::tick::TickConfig;
use lobbyforge::{
    CreateParams, Lobby, LobbyError, LobbyService, LocalUser, MatchmakingPlatform, SearchParams,
    SessionCreated,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

// =========================================================================
// Helpers
// =========================================================================

/// Forwards every request to the test, which answers through the
/// service's inbound sender.
struct ChannelPlatform {
    next_id: u32,
    issued: mpsc::UnboundedSender<(RequestId, PlatformRequest)>,
}

impl MatchmakingPlatform for ChannelPlatform {
    fn issue(&mut self, request: PlatformRequest) -> Result<RequestId, PlatformErrorCode> {
        self.next_id += 1;
        let id = RequestId(self.next_id);
        self.issued
            .send((id, request))
            .map_err(|_| PlatformErrorCode::Code(-1))?;
        Ok(id)
    }

    fn add_job(&mut self, _job: WebJob) -> Result<JobId, PlatformErrorCode> {
        Err(PlatformErrorCode::Code(-2))
    }
}

fn lobby() -> (Lobby, mpsc::UnboundedReceiver<(RequestId, PlatformRequest)>) {
    let (issued, issued_rx) = mpsc::unbounded_channel();
    let platform = ChannelPlatform { next_id: 0, issued };
    let (lobby, _events) = Lobby::builder().platform(platform).rng_seed(1).build().unwrap();
    (lobby, issued_rx)
}

fn response(
    request: RequestId,
    issued: &PlatformRequest,
    result: PlatformResponse,
) -> PlatformEvent {
    PlatformEvent::Response {
        request,
        kind: issued.kind(),
        result: Ok(result),
    }
}

/// Answers the two requests of a create: the world list, then the room.
async fn serve_create(
    issued: &mut mpsc::UnboundedReceiver<(RequestId, PlatformRequest)>,
    inbound: &lobbyforge::InboundSender,
) {
    let (request, worlds) = issued.recv().await.unwrap();
    assert!(matches!(worlds, PlatformRequest::GetWorldInfoList { .. }));
    inbound
        .platform_event(response(
            request,
            &worlds,
            PlatformResponse::WorldInfoList(vec![WorldInfo {
                id: WorldId(2),
                num_rooms: 1,
                num_members: 2,
            }]),
        ))
        .unwrap();

    let (request, create) = issued.recv().await.unwrap();
    let PlatformRequest::CreateJoinRoom(params) = &create else {
        panic!("expected a create request, got {create:?}");
    };
    let snapshot = RoomSnapshot {
        room: RoomId(55),
        world: params.world,
        server: ServerId(1),
        game_flags: 0,
        members: vec![MemberSnapshot {
            member: MemberId(1),
            online_id: OnlineId::new("host"),
            owner: true,
            is_me: true,
            user_data: Vec::new(),
        }],
    };
    inbound
        .platform_event(response(request, &create, PlatformResponse::RoomCreated(snapshot)))
        .unwrap();
}

fn spawn_create(
    handle: &lobbyforge::LobbyHandle,
) -> JoinHandle<Result<SessionCreated, LobbyError>> {
    let handle = handle.clone();
    tokio::spawn(async move {
        handle
            .create_session(vec![LocalUser(0)], CreateParams::default())
            .await
    })
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_create_session_through_handle() {
    let (lobby, mut issued) = lobby();
    let (service, handle, inbound) = LobbyService::spawn(lobby, TickConfig::with_rate(30));

    let create = spawn_create(&handle);
    serve_create(&mut issued, &inbound).await;
    let created = create.await.unwrap().unwrap();

    assert_eq!(created.id.room, RoomId(55));
    assert_eq!(created.id.world, WorldId(2));
    assert_eq!(handle.session_id(created.session).await.unwrap(), created.id);

    let users = handle.get_users(created.session).await.unwrap();
    assert_eq!(users.len(), 1);
    assert!(users[0].is_local);

    handle.shutdown().await.unwrap();
    let lobby = service.await.unwrap();
    assert_eq!(lobby.session_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_error_returned_to_caller() {
    let (lobby, _issued) = lobby();
    let (_service, handle, _inbound) = LobbyService::spawn(lobby, TickConfig::with_rate(30));

    let params = SearchParams {
        max_results: 0,
        ..SearchParams::default()
    };
    let err = handle.search(LocalUser(0), params).await.unwrap_err();
    assert!(matches!(err, LobbyError::InvalidParam));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_job_fails_advertisement_lookup() {
    let (lobby, _issued) = lobby();
    let (_service, handle, _inbound) = LobbyService::spawn(lobby, TickConfig::with_rate(30));

    let id = lobbyforge::protocol::SessionId::new(WorldId(1), RoomId(9), ServerId(1), 0)
        .with_web_session(lobbyforge::protocol::WebSessionId::new("ws-9").unwrap());
    let err = handle.get_advertisement_data(id).await.unwrap_err();
    assert!(matches!(err, LobbyError::InternalError));
}

#[tokio::test(start_paused = true)]
async fn test_delete_session_through_handle() {
    let (lobby, mut issued) = lobby();
    let (service, handle, inbound) = LobbyService::spawn(lobby, TickConfig::with_rate(30));

    let create = spawn_create(&handle);
    serve_create(&mut issued, &inbound).await;
    let created = create.await.unwrap().unwrap();

    let delete = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.delete_session(created.session).await })
    };
    let (request, leave) = issued.recv().await.unwrap();
    assert_eq!(leave, PlatformRequest::LeaveRoom { room: RoomId(55) });
    inbound
        .platform_event(response(request, &leave, PlatformResponse::Done))
        .unwrap();
    delete.await.unwrap().unwrap();

    let err = handle.session_id(created.session).await.unwrap_err();
    assert!(matches!(err, LobbyError::InvalidSession));

    handle.shutdown().await.unwrap();
    assert_eq!(service.await.unwrap().session_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_handle_after_shutdown_unavailable() {
    let (lobby, _issued) = lobby();
    let (service, handle, inbound) = LobbyService::spawn(lobby, TickConfig::with_rate(30));

    handle.shutdown().await.unwrap();
    service.await.unwrap();

    let err = handle
        .create_session(vec![LocalUser(0)], CreateParams::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LobbyError::ServiceUnavailable));
    assert!(matches!(
        inbound.platform_event(PlatformEvent::Fatal {
            code: PlatformErrorCode::Code(-1),
        }),
        Err(LobbyError::ServiceUnavailable)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_service_stops_when_handles_dropped() {
    let (lobby, _issued) = lobby();
    let (service, handle, _inbound) = LobbyService::spawn(lobby, TickConfig::default());

    drop(handle);
    let lobby = service.await.unwrap();
    assert_eq!(lobby.task_count(), 0);
}
