//! The matchmaking service as seen by the lobby.

use lobbyforge_protocol::{JobId, PlatformErrorCode, PlatformRequest, RequestId, WebJob};

/// Outbound half of the matchmaking service.
///
/// Both calls only *issue* work. The outcome arrives later as a
/// [`PlatformEvent`](lobbyforge_protocol::PlatformEvent) carrying the
/// returned id, pushed through an [`InboundSender`](crate::InboundSender)
/// or handed to [`Lobby::on_platform_event`](crate::Lobby::on_platform_event).
///
/// `Send + 'static` because the platform lives inside the lobby, which is
/// moved onto the scheduler task.
pub trait MatchmakingPlatform: Send + 'static {
    /// Issues a matchmaking request and returns its correlation id.
    ///
    /// # Errors
    /// The code the platform rejected the request with.
    fn issue(&mut self, request: PlatformRequest) -> Result<RequestId, PlatformErrorCode>;

    /// Queues a web API job and returns its id.
    ///
    /// # Errors
    /// The code the platform rejected the job with.
    fn add_job(&mut self, job: WebJob) -> Result<JobId, PlatformErrorCode>;
}
