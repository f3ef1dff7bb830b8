//! Integration tests for sessions, members and signaling.

use std::time::Duration;

use lobbyforge_protocol::{HostHint, MemberId, MemberSnapshot, NatType, OnlineId, RoomId};
use lobbyforge_session::{
    RegistryConfig, SessionError, SessionHandle, SessionRegistry, SignalingState, SignalingStatus,
};
use tokio::time::{self, Instant};

// =========================================================================
// Helpers
// =========================================================================

const TIMEOUT: Duration = Duration::from_secs(15);

fn member(id: u16, is_me: bool, owner: bool) -> MemberSnapshot {
    MemberSnapshot {
        member: MemberId(id),
        online_id: OnlineId::new(format!("player{id}")),
        owner,
        is_me,
        user_data: vec![id as u8],
    }
}

fn registry_with_room(as_host: bool) -> (SessionRegistry, SessionHandle) {
    let mut reg = SessionRegistry::new(RegistryConfig::default());
    let h = reg.create_session(as_host).unwrap();
    reg.get_mut(h).unwrap().room = RoomId(100);
    (reg, h)
}

fn hint(active_connections: u32, ping_ms: u32) -> HostHint {
    HostHint {
        active_connections,
        ping_ms,
        upstream_bps: 1_000_000,
        nat: NatType::Open,
    }
}

// =========================================================================
// Member table
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_add_member_duplicate_rejected() {
    let (mut reg, h) = registry_with_room(true);
    let now = Instant::now();
    reg.add_member(h, &member(1, true, true), now).unwrap();
    reg.add_member(h, &member(2, false, false), now).unwrap();

    let err = reg.add_member(h, &member(2, false, false), now).unwrap_err();
    assert!(matches!(err, SessionError::DuplicateMember { member: MemberId(2), .. }));
    assert_eq!(reg.get(h).unwrap().members().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_add_member_sets_local_identity() {
    let (mut reg, h) = registry_with_room(true);
    reg.add_member(h, &member(4, true, true), Instant::now()).unwrap();

    let session = reg.get(h).unwrap();
    let local = session.local.unwrap();
    assert_eq!(local.room, RoomId(100));
    assert_eq!(local.member, MemberId(4));
    assert_eq!(session.me().unwrap().signaling, SignalingState::None);
}

#[tokio::test(start_paused = true)]
async fn test_add_member_other_starts_pending() {
    let (mut reg, h) = registry_with_room(true);
    let added = reg.add_member(h, &member(2, false, false), Instant::now()).unwrap();
    assert_eq!(added.signaling.status(), SignalingStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn test_add_member_second_owner_keeps_one_owner() {
    let (mut reg, h) = registry_with_room(false);
    let now = Instant::now();
    reg.add_member(h, &member(1, false, true), now).unwrap();
    reg.add_member(h, &member(2, false, true), now).unwrap();

    let session = reg.get(h).unwrap();
    let owners: Vec<_> = session.members().iter().filter(|m| m.owner).collect();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].id, MemberId(2));
}

#[tokio::test(start_paused = true)]
async fn test_add_member_table_full_rejected() {
    let mut reg = SessionRegistry::new(RegistryConfig {
        max_sessions: 1,
        max_members: 2,
    });
    let h = reg.create_session(true).unwrap();
    let now = Instant::now();
    reg.add_member(h, &member(1, true, true), now).unwrap();
    reg.add_member(h, &member(2, false, false), now).unwrap();
    assert!(matches!(
        reg.add_member(h, &member(3, false, false), now),
        Err(SessionError::MemberTableFull { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_change_owner_moves_flag() {
    let (mut reg, h) = registry_with_room(true);
    let now = Instant::now();
    reg.add_member(h, &member(1, true, true), now).unwrap();
    reg.add_member(h, &member(2, false, false), now).unwrap();

    reg.change_owner(h, MemberId(1), MemberId(2)).unwrap();
    let session = reg.get(h).unwrap();
    assert!(!session.member(MemberId(1)).unwrap().owner);
    assert_eq!(session.owner().unwrap().id, MemberId(2));
}

#[tokio::test(start_paused = true)]
async fn test_change_owner_unknown_member_rejected() {
    let (mut reg, h) = registry_with_room(true);
    reg.add_member(h, &member(1, true, true), Instant::now()).unwrap();
    assert!(matches!(
        reg.change_owner(h, MemberId(1), MemberId(9)),
        Err(SessionError::MemberNotFound { .. })
    ));
    assert!(reg.get(h).unwrap().member(MemberId(1)).unwrap().owner);
}

#[tokio::test(start_paused = true)]
async fn test_stale_handle_rejected_after_slot_reuse() {
    let mut reg = SessionRegistry::new(RegistryConfig {
        max_sessions: 1,
        ..RegistryConfig::default()
    });
    let old = reg.create_session(true).unwrap();
    reg.free(old).unwrap();
    let new = reg.create_session(false).unwrap();

    assert!(matches!(
        reg.add_member(old, &member(1, true, true), Instant::now()),
        Err(SessionError::InvalidSession(h)) if h == old
    ));
    assert!(!reg.get(new).unwrap().is_host());
}

// =========================================================================
// Signaling
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_update_signaling_pending_times_out_to_dead() {
    let (mut reg, h) = registry_with_room(true);
    reg.add_member(h, &member(1, true, true), Instant::now()).unwrap();
    reg.add_member(h, &member(2, false, false), Instant::now()).unwrap();

    time::advance(TIMEOUT).await;
    assert!(reg.update_signaling(Instant::now(), TIMEOUT).is_empty());

    time::advance(Duration::from_millis(1)).await;
    let dead = reg.update_signaling(Instant::now(), TIMEOUT);
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].member, MemberId(2));
    assert_eq!(dead[0].room, RoomId(100));

    // Dead is terminal: a late Connected cannot revive the member.
    let session = reg.get_mut(h).unwrap();
    let m = session.member_mut(MemberId(2)).unwrap();
    assert!(!m.signaling.activate(Instant::now()));
    assert_eq!(m.signaling, SignalingState::Dead);
}

#[tokio::test(start_paused = true)]
async fn test_update_signaling_reports_each_member_once() {
    let (mut reg, h) = registry_with_room(true);
    reg.add_member(h, &member(2, false, false), Instant::now()).unwrap();
    time::advance(TIMEOUT * 2).await;
    assert_eq!(reg.update_signaling(Instant::now(), TIMEOUT).len(), 1);
    assert!(reg.update_signaling(Instant::now(), TIMEOUT).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_check_signaling_owner_is_me_active() {
    let (mut reg, h) = registry_with_room(true);
    reg.add_member(h, &member(1, true, true), Instant::now()).unwrap();
    assert_eq!(reg.get(h).unwrap().check_signaling(), SignalingStatus::Active);
}

#[tokio::test(start_paused = true)]
async fn test_check_signaling_no_owner_is_none() {
    let (mut reg, h) = registry_with_room(false);
    reg.add_member(h, &member(1, true, false), Instant::now()).unwrap();
    assert_eq!(reg.get(h).unwrap().check_signaling(), SignalingStatus::None);
}

#[tokio::test(start_paused = true)]
async fn test_check_signaling_waits_for_host_ack() {
    let (mut reg, h) = registry_with_room(false);
    let now = Instant::now();
    reg.add_member(h, &member(1, false, true), now).unwrap();
    reg.add_member(h, &member(2, true, false), now).unwrap();
    let session = reg.get_mut(h).unwrap();
    session.require_host_ack = true;
    assert_eq!(session.check_signaling(), SignalingStatus::Pending);

    session.member_mut(MemberId(1)).unwrap().signaling.activate(now);
    assert_eq!(session.check_signaling(), SignalingStatus::Pending);

    session.member_mut(MemberId(1)).unwrap().host_join_ack = true;
    assert_eq!(session.check_signaling(), SignalingStatus::Active);
}

#[tokio::test(start_paused = true)]
async fn test_update_signaling_unacked_owner_goes_dead() {
    let (mut reg, h) = registry_with_room(false);
    let now = Instant::now();
    reg.add_member(h, &member(1, false, true), now).unwrap();
    {
        let session = reg.get_mut(h).unwrap();
        session.require_host_ack = true;
        session.member_mut(MemberId(1)).unwrap().signaling.activate(now);
    }

    time::advance(TIMEOUT + Duration::from_secs(1)).await;
    let dead = reg.update_signaling(Instant::now(), TIMEOUT);
    assert_eq!(dead.len(), 1);
    assert_eq!(reg.get(h).unwrap().check_signaling(), SignalingStatus::Dead);
}

#[tokio::test(start_paused = true)]
async fn test_update_signaling_active_without_ack_requirement_stays_active() {
    let (mut reg, h) = registry_with_room(true);
    let now = Instant::now();
    reg.add_member(h, &member(2, false, false), now).unwrap();
    reg.get_mut(h).unwrap().member_mut(MemberId(2)).unwrap().signaling.activate(now);

    time::advance(TIMEOUT * 3).await;
    assert!(reg.update_signaling(Instant::now(), TIMEOUT).is_empty());
}

// =========================================================================
// Host hints
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_best_host_candidate_skips_inactive_members() {
    let (mut reg, h) = registry_with_room(true);
    let now = Instant::now();
    reg.add_member(h, &member(1, true, true), now).unwrap();
    reg.add_member(h, &member(2, false, false), now).unwrap();
    reg.add_member(h, &member(3, false, false), now).unwrap();
    let session = reg.get_mut(h).unwrap();
    session.member_mut(MemberId(2)).unwrap().host_hint = Some(hint(5, 10));
    let m3 = session.member_mut(MemberId(3)).unwrap();
    m3.host_hint = Some(hint(2, 10));
    m3.signaling.activate(now);

    assert_eq!(session.best_host_candidate(), Some((MemberId(3), hint(2, 10))));
}

#[tokio::test(start_paused = true)]
async fn test_best_host_candidate_tie_goes_to_lowest_id() {
    let (mut reg, h) = registry_with_room(true);
    let now = Instant::now();
    for id in [5, 3] {
        reg.add_member(h, &member(id, false, false), now).unwrap();
        let m = reg.get_mut(h).unwrap().member_mut(MemberId(id)).unwrap();
        m.host_hint = Some(hint(1, 50));
        m.signaling.activate(now);
    }
    let best = reg.get(h).unwrap().best_host_candidate().unwrap();
    assert_eq!(best.0, MemberId(3));
}

#[tokio::test(start_paused = true)]
async fn test_owner_privilege_rank_orders_by_hint() {
    let (mut reg, h) = registry_with_room(true);
    let now = Instant::now();
    reg.add_member(h, &member(1, true, true), now).unwrap();
    reg.add_member(h, &member(2, false, false), now).unwrap();
    reg.add_member(h, &member(3, false, false), now).unwrap();
    let session = reg.get_mut(h).unwrap();
    session.local_hint = hint(2, 40);
    session.member_mut(MemberId(3)).unwrap().host_hint = Some(hint(2, 20));

    assert_eq!(
        session.owner_privilege_rank(),
        vec![MemberId(3), MemberId(1), MemberId(2)]
    );
}
