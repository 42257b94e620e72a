#![allow(non_snake_case)]

use super::*;
use crate::{
    outcome::{
        Category,
        Symbol,
    },
    secret::commitment_of,
    test_helpers::{
        CHAIN_ID,
        FakeChain,
        FakeIdentity,
        FakeOrchestrator,
        HOUSE_SECRET,
        RecordingNotifier,
        RunningHouse,
        eth,
        eventually,
        other_player_address,
        owner_address,
        player_address,
    },
};
use std::time::Duration;

fn settings(secret: Option<&str>) -> Settings {
    Settings {
        target_chain_id: CHAIN_ID,
        house_secret: secret.map(|s| HouseSecret::new(s).unwrap()),
        auto_resolve: secret.is_some(),
    }
}

fn orchestrator_with(
    chain: &FakeChain,
    identity: FakeIdentity,
    account: Address,
    secret: Option<&str>,
) -> (Arc<FakeOrchestrator>, RecordingNotifier) {
    let notifier = RecordingNotifier::new();
    let orchestrator = Orchestrator::new(
        chain.slot_machine(Some(account)),
        identity,
        notifier.clone(),
        settings(secret),
    );
    (Arc::new(orchestrator), notifier)
}

fn house(chain: &FakeChain) -> (Arc<FakeOrchestrator>, RecordingNotifier) {
    orchestrator_with(
        chain,
        chain.identity(owner_address()),
        owner_address(),
        Some(HOUSE_SECRET),
    )
}

fn player(chain: &FakeChain) -> (Arc<FakeOrchestrator>, RecordingNotifier) {
    orchestrator_with(chain, chain.identity(player_address()), player_address(), None)
}

fn house_commitment() -> Bytes32 {
    commitment_of(&normalize(HOUSE_SECRET).unwrap())
}

fn wager() -> Wager {
    Wager::from_ether("0.01").unwrap()
}

#[tokio::test]
async fn connect__owner_with_secret_commits_once() {
    // given
    let chain = FakeChain::new(owner_address());
    let (house, notifier) = house(&chain);

    // when
    let user = house.connect().await.unwrap();
    house.connect().await.unwrap();

    // then
    assert_eq!(user, owner_address());
    assert_eq!(chain.commit(), house_commitment());
    assert_eq!(chain.commit_calls(), 1);
    assert_eq!(
        house.session().commitment,
        CommitmentState::Set(house_commitment())
    );
    assert!(notifier.statuses().contains(&"Commit set ✓".to_string()));
}

#[tokio::test]
async fn connect__primes_balances_and_config() {
    // given
    let chain = FakeChain::new(owner_address());
    chain
        .state()
        .balances
        .insert(player_address(), eth(3));
    let (player, notifier) = player(&chain);

    // when
    player.connect().await.unwrap();

    // then
    let snapshot = player.session();
    assert_eq!(snapshot.user, Some(player_address()));
    assert_eq!(snapshot.balance, Some(eth(3)));
    assert_eq!(snapshot.owner, Some(owner_address()));
    assert_eq!(snapshot.config.unwrap().max_bet, eth(1));
    assert!(snapshot.events_bound);
    let logs: Vec<String> = notifier
        .notifications()
        .into_iter()
        .filter_map(|n| n.log.map(|l| l.text))
        .collect();
    assert!(logs.iter().any(|l| l == "Config: min 0.0010 ETH • max 1.0000 ETH"));
    assert!(logs.iter().any(|l| l == "Auto-resolve listener attached"));
}

#[tokio::test]
async fn connect__failed_balance_reads_keep_placeholders() {
    let chain = FakeChain::new(owner_address());
    chain.state().fail_balance_reads = true;
    let (player, _) = player(&chain);

    player.connect().await.unwrap();

    let snapshot = player.session();
    assert_eq!(snapshot.balance, None);
    assert_eq!(snapshot.loyalty, None);
}

#[tokio::test]
async fn connect__non_owner_with_secret_sends_no_commit() {
    // given
    let chain = FakeChain::new(owner_address());
    let (orchestrator, notifier) = orchestrator_with(
        &chain,
        chain.identity(player_address()),
        player_address(),
        Some(HOUSE_SECRET),
    );

    // when
    orchestrator.connect().await.unwrap();
    let explicit = orchestrator.commit().await;

    // then
    assert!(matches!(
        explicit,
        Err(SlotsError::PermissionDenied {
            action: "commit",
            ..
        })
    ));
    assert_eq!(chain.commit_calls(), 0);
    assert!(chain.commit().is_zero());
    assert!(
        notifier
            .statuses()
            .iter()
            .any(|s| s.starts_with("Need owner wallet to commit"))
    );
}

#[tokio::test]
async fn commit__reports_existing_commitment_without_transaction() {
    // given
    let chain = FakeChain::new(owner_address());
    chain.set_commit(Bytes32([7; 32]));
    let (house, _) = house(&chain);

    // when
    house.connect().await.unwrap();
    let outcome = house.commit().await.unwrap();

    // then
    assert_eq!(outcome, CommitOutcome::AlreadySet(Bytes32([7; 32])));
    assert_eq!(chain.commit_calls(), 0);
}

#[tokio::test]
async fn commit__without_secret_is_refused() {
    let chain = FakeChain::new(owner_address());
    let (orchestrator, _) = orchestrator_with(
        &chain,
        chain.identity(owner_address()),
        owner_address(),
        None,
    );

    let result = orchestrator.commit().await;

    assert_eq!(result, Err(SlotsError::EmptySecret));
    assert_eq!(chain.commit_calls(), 0);
}

#[tokio::test]
async fn connect__wrong_network_switches_when_allowed() {
    // given
    let chain = FakeChain::new(owner_address());
    chain.state().chain_id = 1;
    let (house, notifier) = house(&chain);

    // when
    house.connect().await.unwrap();

    // then
    assert_eq!(chain.state().chain_id, CHAIN_ID);
    assert!(notifier.statuses().contains(&"Wrong network (chainId 1)".to_string()));
    assert_eq!(chain.commit_calls(), 1);
}

#[tokio::test]
async fn connect__refused_switch_blocks_transactions() {
    // given
    let chain = FakeChain::new(owner_address());
    chain.state().chain_id = 1;
    let (house, _) = orchestrator_with(
        &chain,
        chain.identity(owner_address()).refusing_switch(),
        owner_address(),
        Some(HOUSE_SECRET),
    );

    // when
    house.connect().await.unwrap();
    let spin = house.spin(wager(), None).await;

    // then
    assert_eq!(chain.commit_calls(), 0);
    assert_eq!(
        spin,
        Err(SlotsError::WrongNetwork {
            expected: CHAIN_ID,
            actual: 1
        })
    );
    assert_eq!(chain.spin_calls(), 0);
}

#[tokio::test]
async fn connect__no_accounts_is_transport_unavailable() {
    let chain = FakeChain::new(owner_address());
    let (orchestrator, _) = orchestrator_with(
        &chain,
        FakeIdentity::new(chain.clone(), Vec::new()),
        player_address(),
        None,
    );

    let result = orchestrator.connect().await;

    assert!(matches!(result, Err(SlotsError::TransportUnavailable(_))));
    assert_eq!(orchestrator.session().user, None);
}

#[tokio::test]
async fn spin__refused_while_commitment_unset() {
    // given
    let chain = FakeChain::new(owner_address());
    let (player, notifier) = player(&chain);
    player.connect().await.unwrap();

    // when
    let result = player.spin(wager(), Some("lucky".to_string())).await;

    // then
    assert_eq!(result, Err(SlotsError::AwaitingCommit));
    assert_eq!(chain.spin_calls(), 0);
    assert!(notifier.statuses().contains(&"Waiting for house commit".to_string()));
}

#[tokio::test]
async fn spin__requires_connected_wallet() {
    let chain = FakeChain::new(owner_address());
    chain.set_commit(house_commitment());
    let (player, _) = player(&chain);

    let result = player.spin(wager(), None).await;

    assert!(matches!(result, Err(SlotsError::TransportUnavailable(_))));
    assert_eq!(chain.spin_calls(), 0);
}

#[tokio::test]
async fn spin__reads_fresh_commitment_when_cache_is_unset() {
    // given
    let chain = FakeChain::new(owner_address());
    let (player, _) = player(&chain);
    player.connect().await.unwrap();
    chain.set_commit(house_commitment());

    // when
    let receipt = player.spin(wager(), Some("lucky".to_string())).await.unwrap();

    // then
    assert_eq!(chain.spin_calls(), 1);
    let pending = player.pending_spin(player_address()).await.unwrap().unwrap();
    assert_eq!(pending.wager, wager().wei());
    assert_eq!(pending.user_seed, normalize("lucky").unwrap());
    assert!(receipt.block_number.is_some());
}

#[tokio::test]
async fn resolve_player__reveals_secret_and_maps_roll() {
    // given
    let chain = FakeChain::new(owner_address());
    let (house, notifier) = house(&chain);
    house.connect().await.unwrap();
    chain.place_pending(player_address(), eth(1) / 100);
    chain.script_roll(3);

    // when
    let outcome = house.resolve_player(player_address()).await.unwrap();

    // then
    let ResolveOutcome::Resolved(result) = outcome else {
        panic!("expected a resolution, got {outcome:?}");
    };
    assert_eq!(result.reels, [Symbol::Star, Symbol::Cherry, Symbol::Cherry]);
    assert_eq!(result.category, Category::Jackpot);
    assert_eq!(notifier.results(), vec![result]);
    assert!(chain.state().pending.is_empty());
    // The reveal consumed the commitment; a fresh one is committed.
    assert_eq!(chain.commit_calls(), 2);
    assert_eq!(chain.commit(), house_commitment());
}

#[tokio::test]
async fn resolve_player__commits_first_when_commitment_unset() {
    // given
    let chain = FakeChain::new(owner_address());
    let (orchestrator, _) = orchestrator_with(
        &chain,
        chain.identity(owner_address()),
        owner_address(),
        Some(HOUSE_SECRET),
    );

    // when
    let outcome = orchestrator
        .resolve_player(player_address())
        .await
        .unwrap();

    // then
    assert_eq!(outcome, ResolveOutcome::NoMatchingEvent);
    assert_eq!(chain.commit_calls(), 1);
    assert_eq!(chain.resolve_calls(player_address()), 1);
}

#[tokio::test]
async fn resolve_player__same_player_is_deduplicated() {
    // given
    let chain = FakeChain::new(owner_address());
    let (house, _) = house(&chain);
    house.connect().await.unwrap();
    chain.place_pending(player_address(), eth(1) / 100);
    chain.hold_resolutions(player_address());
    let first = tokio::spawn({
        let house = Arc::clone(&house);
        async move { house.resolve_player(player_address()).await }
    });
    eventually(|| chain.resolve_calls(player_address()) == 1).await;

    // when
    let second = house.resolve_player(player_address()).await.unwrap();

    // then
    assert_eq!(second, ResolveOutcome::AlreadyInFlight);
    assert!(house.is_resolving(player_address()));
    chain.release_resolutions(player_address());
    let first = first.await.unwrap().unwrap();
    assert!(matches!(first, ResolveOutcome::Resolved(_)));
    assert_eq!(chain.resolve_calls(player_address()), 1);
    assert!(!house.is_resolving(player_address()));
}

#[tokio::test]
async fn resolve_player__different_players_proceed_concurrently() {
    // given
    let chain = FakeChain::new(owner_address());
    let (house, _) = house(&chain);
    house.connect().await.unwrap();
    chain.hold_resolutions(player_address());
    chain.hold_resolutions(other_player_address());

    // when
    let spawn_resolve = |player: Address| {
        let house = Arc::clone(&house);
        tokio::spawn(async move { house.resolve_player(player).await })
    };
    let first = spawn_resolve(player_address());
    let second = spawn_resolve(other_player_address());

    // then
    eventually(|| {
        chain.resolve_calls(player_address()) == 1
            && chain.resolve_calls(other_player_address()) == 1
    })
    .await;
    assert!(house.is_resolving(player_address()));
    assert!(house.is_resolving(other_player_address()));
    chain.release_resolutions(player_address());
    chain.release_resolutions(other_player_address());
    assert_eq!(first.await.unwrap(), Ok(ResolveOutcome::NoMatchingEvent));
    assert_eq!(second.await.unwrap(), Ok(ResolveOutcome::NoMatchingEvent));
}

#[tokio::test]
async fn resolve_player__no_event_still_releases_ticket() {
    // given
    let chain = FakeChain::new(owner_address());
    let (house, notifier) = house(&chain);
    house.connect().await.unwrap();

    // when
    let first = house.resolve_player(player_address()).await.unwrap();
    let second = house.resolve_player(player_address()).await.unwrap();

    // then
    assert_eq!(first, ResolveOutcome::NoMatchingEvent);
    assert_eq!(second, ResolveOutcome::NoMatchingEvent);
    assert_eq!(chain.resolve_calls(player_address()), 2);
    assert!(!house.is_resolving(player_address()));
    assert!(notifier.results().is_empty());
    assert!(notifier.statuses().contains(&"Spin resolved ✓".to_string()));
}

#[tokio::test]
async fn resolve_player__non_owner_sends_nothing() {
    // given
    let chain = FakeChain::new(owner_address());
    chain.set_commit(house_commitment());
    let (orchestrator, _) = orchestrator_with(
        &chain,
        chain.identity(player_address()),
        player_address(),
        Some(HOUSE_SECRET),
    );

    // when
    let result = orchestrator.resolve_player(other_player_address()).await;

    // then
    assert!(matches!(
        result,
        Err(SlotsError::PermissionDenied {
            action: "resolve",
            ..
        })
    ));
    assert_eq!(chain.total_resolve_calls(), 0);
    assert!(!orchestrator.is_resolving(other_player_address()));
}

#[tokio::test]
async fn resolve_player__wrong_secret_reverts_and_releases_ticket() {
    // given
    let chain = FakeChain::new(owner_address());
    chain.set_commit(Bytes32([9; 32]));
    chain.place_pending(player_address(), eth(1) / 100);
    let (house, notifier) = house(&chain);

    // when
    let result = house.resolve_player(player_address()).await;

    // then
    assert!(matches!(result, Err(SlotsError::TransactionReverted { .. })));
    assert!(!house.is_resolving(player_address()));
    assert!(chain.state().pending.contains_key(&player_address()));
    assert!(notifier.statuses().contains(&"Resolve failed".to_string()));
}

#[tokio::test]
async fn setup_auto_resolve__binds_once_per_session() {
    // given
    let chain = FakeChain::new(owner_address());
    let (house, _) = house(&chain);
    house.connect().await.unwrap();

    // when
    let again = house.setup_auto_resolve().await.unwrap();

    // then
    assert!(!again);
    assert_eq!(chain.state().subscriptions, 1);
}

#[tokio::test]
async fn setup_auto_resolve__failure_can_be_retried() {
    // given
    let chain = FakeChain::new(owner_address());
    chain.state().fail_subscriptions = true;
    let (house, notifier) = house(&chain);
    house.connect().await.unwrap();
    assert!(!house.session().events_bound);
    assert!(notifier.notifications().iter().any(|n| {
        n.log
            .as_ref()
            .is_some_and(|l| l.text.starts_with("Could not setup auto-resolve"))
    }));

    // when
    chain.state().fail_subscriptions = false;
    let attached = house.setup_auto_resolve().await.unwrap();

    // then
    assert!(attached);
    assert_eq!(chain.state().subscriptions, 1);
}

#[tokio::test]
async fn run__resolves_requested_spins() {
    // given
    let chain = FakeChain::new(owner_address());
    chain.script_roll(3);
    let (house, house_notes) = house(&chain);
    house.connect().await.unwrap();
    let house_loop = RunningHouse::spawn(&house);
    let (player, _) = player(&chain);
    player.connect().await.unwrap();

    // when
    player
        .spin(wager(), Some("lucky".to_string()))
        .await
        .unwrap();

    // then
    eventually(|| !house_notes.results().is_empty()).await;
    let result = house_notes.results()[0];
    assert_eq!(result.reels, [Symbol::Star, Symbol::Cherry, Symbol::Cherry]);
    assert_eq!(result.category, Category::Jackpot);
    eventually(|| chain.commit_calls() == 2).await;
    assert_eq!(chain.resolve_calls(player_address()), 1);
    house_loop.stop().await;
}

#[tokio::test]
async fn run__ignores_requests_without_auto_resolve() {
    // given
    let chain = FakeChain::new(owner_address());
    chain.set_commit(house_commitment());
    let (watcher, _) = player(&chain);
    watcher.connect().await.unwrap();
    let watcher_loop = RunningHouse::spawn(&watcher);

    // when
    chain
        .slot_machine(Some(other_player_address()))
        .spin(normalize("seed").unwrap(), wager())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // then
    assert_eq!(chain.total_resolve_calls(), 0);
    watcher_loop.stop().await;
}

#[tokio::test]
async fn run__waits_for_in_flight_resolution_on_shutdown() {
    // given
    let chain = FakeChain::new(owner_address());
    let (house, _) = house(&chain);
    house.connect().await.unwrap();
    let mut house_loop = RunningHouse::spawn(&house);
    chain.hold_resolutions(player_address());
    chain
        .slot_machine(Some(player_address()))
        .spin(normalize("seed").unwrap(), wager())
        .await
        .unwrap();
    eventually(|| chain.resolve_calls(player_address()) == 1).await;

    // when
    house_loop.signal_stop();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // then
    assert!(!house_loop.is_finished());
    chain.release_resolutions(player_address());
    house_loop.join().await;
    assert!(chain.state().pending.is_empty());
}

#[tokio::test]
async fn run__chain_change_resets_and_reconnects() {
    // given
    let chain = FakeChain::new(owner_address());
    let identity = chain.identity(owner_address());
    let changes = identity.change_sender();
    let (house, notifier) =
        orchestrator_with(&chain, identity, owner_address(), Some(HOUSE_SECRET));
    house.connect().await.unwrap();
    let house_loop = RunningHouse::spawn(&house);

    // when
    changes.send(IdentityChange::ChainChanged(CHAIN_ID)).unwrap();

    // then
    eventually(|| chain.state().subscriptions == 2).await;
    eventually(|| house.session().events_bound).await;
    eventually(|| chain.state().live_subscribers() == 1).await;
    assert_eq!(chain.commit_calls(), 1);
    assert_eq!(
        house.session().commitment,
        CommitmentState::Set(house_commitment())
    );
    assert!(notifier.notifications().iter().any(|n| {
        n.log
            .as_ref()
            .is_some_and(|l| l.text == "Chain changed. Reloading...")
    }));
    house_loop.stop().await;
}

#[tokio::test]
async fn run__account_change_clears_user_and_reconnects() {
    // given
    let chain = FakeChain::new(owner_address());
    let identity = chain.identity(player_address());
    let changes = identity.change_sender();
    let (player, notifier) = orchestrator_with(&chain, identity, player_address(), None);
    player.connect().await.unwrap();
    let player_loop = RunningHouse::spawn(&player);

    // when
    changes
        .send(IdentityChange::AccountsChanged(vec![other_player_address()]))
        .unwrap();

    // then
    eventually(|| {
        notifier
            .statuses()
            .iter()
            .filter(|s| s.as_str() == "Connected")
            .count()
            == 2
    })
    .await;
    assert!(notifier.statuses().contains(&"Account changed".to_string()));
    assert_eq!(chain.state().subscriptions, 1);
    player_loop.stop().await;
}

#[tokio::test]
async fn refund__returns_stuck_wager() {
    // given
    let chain = FakeChain::new(owner_address());
    chain.place_pending(player_address(), eth(1) / 100);
    let (player, _) = player(&chain);
    player.connect().await.unwrap();

    // when
    player.refund().await.unwrap();

    // then
    assert_eq!(player.pending_spin(player_address()).await.unwrap(), None);
    assert_eq!(player.session().balance, Some(eth(1) / 100));
}

#[test]
fn capitalize__uppercases_first_character() {
    assert_eq!(capitalize("waiting for house commit"), "Waiting for house commit");
    assert_eq!(capitalize(""), "");
}
