//! Full socket-based integration tests for client ↔ server replication.

use std::time::Duration;

use worldsync_client::client::WorldClient;
use worldsync_client::shadow::{FixedViewpoint, NullSink, RenderSink};
use worldsync_shared::config::SyncConfig;
use worldsync_shared::math::{Pose, Vec3};
use worldsync_shared::net::{
    decode_from_bytes, encode_to_bytes, SessionId, UpstreamUpdate, WorldMsg,
};
use worldsync_shared::registry::player_body_name;
use worldsync_server::server::bind_ephemeral;

/// Unit-style test: protocol messages roundtrip correctly.
#[test]
fn protocol_messages_roundtrip() -> anyhow::Result<()> {
    let identity = WorldMsg::Identity {
        id: SessionId("s1".to_string()),
        name_seed: 1,
        scenario: -1,
    };
    assert_eq!(decode_from_bytes(&encode_to_bytes(&identity)?)?, identity);

    let set_name = WorldMsg::SetName {
        name: "Alice".to_string(),
    };
    assert_eq!(decode_from_bytes(&encode_to_bytes(&set_name)?)?, set_name);

    let update = WorldMsg::Update(UpstreamUpdate {
        pose: None,
        ping: 16,
        timestamp: 123_456,
    });
    assert_eq!(decode_from_bytes(&encode_to_bytes(&update)?)?, update);

    Ok(())
}

/// Pumps inbound messages until the condition holds or the poll limit runs out.
async fn pump_until(
    client: &mut WorldClient,
    sink: &mut dyn RenderSink,
    mut cond: impl FnMut(&WorldClient) -> bool,
) -> bool {
    for _ in 0..400 {
        let _ = client.poll_message(Duration::from_millis(10), sink).await;
        if cond(client) {
            return true;
        }
    }
    false
}

/// Full integration: identity handshake, scenario switch, falling world
/// entity, a second participant joining and leaving.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_server_full_roundtrip() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();

    // Bind server to an ephemeral port and run its loop in the background.
    let (mut server, cfg) = bind_ephemeral(60).await?;
    let server_handle = tokio::spawn(async move {
        server.run().await;
    });

    // Give the loop a moment to start ticking.
    tokio::time::sleep(Duration::from_millis(10)).await;

    let mut sink1 = NullSink;
    let mut c1 = WorldClient::connect(
        &SyncConfig {
            server_addr: cfg.server_addr.clone(),
            player_name: "Alice".to_string(),
            ..Default::default()
        },
        &mut sink1,
    )
    .await?;
    assert!(c1.session_id.as_str().starts_with('s'));
    assert_eq!(c1.scenario, -1);
    assert!(c1.display_name.starts_with("Alice"));

    // Any session may request a scenario change; it lands via broadcast.
    c1.request_scenario(0).await?;
    assert!(
        pump_until(&mut c1, &mut sink1, |c| c.scenario == 0).await,
        "scenario change never arrived"
    );
    assert!(
        pump_until(&mut c1, &mut sink1, |c| {
            c.reconciler().shadow().contains("floor") && c.reconciler().shadow().contains("box")
        })
        .await,
        "world entities never replicated"
    );

    // The box falls under gravity: its y must decrease between snapshots.
    let y1 = c1.reconciler().shadow().pose("box").unwrap().position.y;
    assert!(y1 > 0.61, "box should still be in the air, got y={y1}");
    assert!(
        pump_until(&mut c1, &mut sink1, |c| {
            c.reconciler().shadow().pose("box").unwrap().position.y < y1 - 1e-3
        })
        .await,
        "box never fell"
    );

    // Second participant joins; C1 sees its roster record and its avatar.
    let mut sink2 = NullSink;
    let mut c2 = WorldClient::connect(
        &SyncConfig {
            server_addr: cfg.server_addr.clone(),
            player_name: "Bob".to_string(),
            ..Default::default()
        },
        &mut sink2,
    )
    .await?;
    let c2_id = c2.session_id.clone();
    let c2_camera = player_body_name(c2_id.as_str(), "camera");
    assert!(
        pump_until(&mut c1, &mut sink1, |c| {
            c.reconciler().roster().contains_key(c2_id.as_str())
                && c.reconciler().shadow().contains(&c2_camera)
        })
        .await,
        "second session never appeared in C1's snapshots"
    );

    // C1's reported viewpoint pose drives its owned body, observed by C2.
    let viewpoint = FixedViewpoint(Pose::at(Vec3::new(1.0, 2.0, 3.0)));
    let c1_camera = player_body_name(c1.session_id.as_str(), "camera");
    let mut seen = false;
    for _ in 0..200 {
        c1.tick(&viewpoint).await?;
        let _ = c1.poll_message(Duration::from_millis(5), &mut sink1).await;
        let _ = c2.poll_message(Duration::from_millis(5), &mut sink2).await;
        if let Some(pose) = c2.reconciler().shadow().pose(&c1_camera) {
            if (pose.position.x - 1.0).abs() < 1e-5 && (pose.position.z - 3.0).abs() < 1e-5 {
                seen = true;
                break;
            }
        }
    }
    assert!(seen, "C1's reported pose never reached C2");

    // C1's own avatar is mirrored but never handed to the render sink.
    assert!(c1.reconciler().shadow().contains(&c1_camera));

    // C2 leaves; C1 gets the removal notice and the next snapshots omit it.
    drop(c2);
    assert!(
        pump_until(&mut c1, &mut sink1, |c| {
            !c.reconciler().roster().contains_key(c2_id.as_str())
                && !c.reconciler().shadow().contains(&c2_camera)
        })
        .await,
        "C2 was never removed from C1's view"
    );
    assert!(
        pump_until(&mut c1, &mut sink1, |c| {
            c.reconciler()
                .snapshots()
                .last_snapshot()
                .map(|snap| {
                    !snap.entries.contains_key(c2_id.as_str())
                        && !snap.entries.contains_key(&c2_camera)
                })
                .unwrap_or(false)
        })
        .await,
        "snapshots still carry the departed session"
    );

    server_handle.abort();
    Ok(())
}

/// Latency bookkeeping makes it back into the roster record.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reported_ping_is_echoed_in_roster() -> anyhow::Result<()> {
    let (mut server, cfg) = bind_ephemeral(60).await?;
    let server_handle = tokio::spawn(async move {
        server.run().await;
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let mut sink = NullSink;
    let mut client = WorldClient::connect(&cfg, &mut sink).await?;
    let id = client.session_id.clone();
    let viewpoint = FixedViewpoint::default();

    let mut echoed = false;
    for _ in 0..200 {
        client.tick(&viewpoint).await?;
        let _ = client
            .poll_message(Duration::from_millis(10), &mut sink)
            .await;
        if let Some(entry) = client.reconciler().roster().get(id.as_str()) {
            if entry.ping >= 0 {
                echoed = true;
                break;
            }
        }
    }
    assert!(echoed, "client ping never came back in the roster");

    server_handle.abort();
    Ok(())
}
