// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end protocol scenarios against a live in-process daemon with a
//! scripted driver.

use std::time::Duration;

use upsd_specs::{Client, Harness, UpsdBuilder};

/// Run a test body inside a LocalSet (the daemon is single-threaded and
/// spawns `!Send` tasks).
macro_rules! local_test {
    ($body:expr) => {{
        let local = tokio::task::LocalSet::new();
        local.run_until($body).await
    }};
}

const DUMP: &[(&str, &str)] = &[
    ("ups.status", "OL"),
    ("battery.charge", "100"),
    ("ups.mfr", "Fake Power Inc."),
];

async fn healthy_harness() -> anyhow::Result<(Harness, upsd_specs::DriverConn)> {
    let mut harness = UpsdBuilder::new().start().await?;
    let driver = harness.serve_driver(DUMP, &["shutdown.return", "beeper.mute"]).await?;

    // Wait until the dump has been replicated before letting the test talk.
    let mut probe = harness.client().await?;
    let reply =
        wait_for_reply(&mut probe, "GET VAR dev battery.charge", "VAR dev battery.charge \"100\"")
            .await?;
    anyhow::ensure!(reply == "VAR dev battery.charge \"100\"", "dump never landed: {reply}");

    Ok((harness, driver))
}

/// Poll a request until the expected reply shows up (driver frames land
/// asynchronously relative to the client socket).
async fn wait_for_reply(client: &mut Client, req: &str, want: &str) -> anyhow::Result<String> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let reply = client.req(req).await?;
        if reply == want || tokio::time::Instant::now() >= deadline {
            return Ok(reply);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn hello_banner() -> anyhow::Result<()> {
    local_test!(async {
        let (harness, _driver) = healthy_harness().await?;
        let mut client = harness.client().await?;

        let banner = client.req("VER").await?;
        assert!(banner.contains("Network UPS Tools"), "unexpected banner: {banner}");

        assert_eq!(client.req("NETVER").await?, "1.3");
        Ok(())
    })
}

#[tokio::test]
async fn auth_ordering() -> anyhow::Result<()> {
    local_test!(async {
        let (harness, _driver) = healthy_harness().await?;
        let mut client = harness.client().await?;

        assert_eq!(client.req("LOGIN dev").await?, "ERR USERNAME-REQUIRED");
        assert_eq!(client.req("USERNAME monitor").await?, "OK");
        assert_eq!(client.req("LOGIN dev").await?, "ERR PASSWORD-REQUIRED");
        assert_eq!(client.req("PASSWORD monpass").await?, "OK");
        assert_eq!(client.req("LOGIN dev").await?, "OK");

        // The login is visible to everyone.
        assert_eq!(client.req("GET NUMLOGINS dev").await?, "NUMLOGINS dev 1");
        let clients = client.req_list("LIST CLIENT dev").await?;
        assert_eq!(clients, vec!["CLIENT dev 127.0.0.1".to_owned()]);
        Ok(())
    })
}

#[tokio::test]
async fn enum_rejection() -> anyhow::Result<()> {
    local_test!(async {
        let mut harness = UpsdBuilder::new().start().await?;
        let mut driver = harness
            .serve_driver(&[("ups.status", "OL"), ("input.transfer.low", "88")], &[])
            .await?;
        driver.send("SETFLAGS input.transfer.low RW NUMBER").await?;
        for allowed in ["85", "88", "90"] {
            driver.send(&format!("ADDENUM input.transfer.low \"{allowed}\"")).await?;
        }

        let mut client = harness.client().await?;
        client.authenticate("admin", "adminpass").await?;

        // Wait until the constraints have been replicated (the device may
        // still be settling right after its dump).
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            match client.req_list("LIST ENUM dev input.transfer.low").await {
                Ok(enums) if enums.len() == 3 => break,
                Ok(_) | Err(_) if tokio::time::Instant::now() < deadline => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                Ok(enums) => anyhow::bail!("enum list never replicated: {enums:?}"),
                Err(e) => return Err(e),
            }
        }

        assert_eq!(client.req("SET VAR dev input.transfer.low 100").await?, "ERR INVALID-VALUE");

        assert_eq!(client.req("SET VAR dev input.transfer.low 88").await?, "OK");
        assert_eq!(driver.read_line().await?, "SET input.transfer.low \"88\"");
        Ok(())
    })
}

#[tokio::test]
async fn stale_promotion_and_recovery() -> anyhow::Result<()> {
    local_test!(async {
        let (harness, mut driver) = {
            let mut harness = UpsdBuilder::new().maxage(1).start().await?;
            let driver = harness.serve_driver(DUMP, &[]).await?;
            (harness, driver)
        };

        let mut client = harness.client().await?;
        let reply =
            wait_for_reply(&mut client, "GET VAR dev ups.status", "VAR dev ups.status \"OL\"")
                .await?;
        assert_eq!(reply, "VAR dev ups.status \"OL\"");

        // Driver silence beyond maxage: the staleness check runs on the
        // two-second tick.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(client.req("GET VAR dev ups.status").await?, "ERR DATA-STALE");

        // Fresh traffic revives the device within one tick.
        driver.send("DATAOK").await?;
        let reply =
            wait_for_reply(&mut client, "GET VAR dev ups.status", "VAR dev ups.status \"OL\"")
                .await?;
        assert_eq!(reply, "VAR dev ups.status \"OL\"");
        Ok(())
    })
}

#[tokio::test]
async fn fsd_latch() -> anyhow::Result<()> {
    local_test!(async {
        let (harness, _driver) = healthy_harness().await?;
        let mut client = harness.client().await?;
        client.authenticate("admin", "adminpass").await?;

        assert_eq!(client.req("FSD dev").await?, "OK FSD-SET");
        assert_eq!(client.req("GET VAR dev ups.status").await?, "VAR dev ups.status \"FSD OL\"");

        // Only ups.status is rewritten.
        assert_eq!(client.req("GET VAR dev battery.charge").await?, "VAR dev battery.charge \"100\"");
        Ok(())
    })
}

#[tokio::test]
async fn dump_atomicity_and_incremental_updates() -> anyhow::Result<()> {
    local_test!(async {
        let (harness, mut driver) = healthy_harness().await?;
        let mut client = harness.client().await?;

        let vars = client.req_list("LIST VAR dev").await?;
        assert!(vars.contains(&"VAR dev battery.charge \"100\"".to_owned()), "{vars:?}");
        assert_eq!(vars.len(), DUMP.len());

        driver.send("SETINFO battery.charge \"77\"").await?;
        let reply = wait_for_reply(
            &mut client,
            "GET VAR dev battery.charge",
            "VAR dev battery.charge \"77\"",
        )
        .await?;
        assert_eq!(reply, "VAR dev battery.charge \"77\"");

        // The listing stays consistent with GET afterwards.
        let vars = client.req_list("LIST VAR dev").await?;
        assert!(vars.contains(&"VAR dev battery.charge \"77\"".to_owned()), "{vars:?}");
        Ok(())
    })
}

#[tokio::test]
async fn tls_upgrade() -> anyhow::Result<()> {
    local_test!(async {
        let (harness, _driver) = {
            let mut harness = UpsdBuilder::new().tls().start().await?;
            let driver = harness.serve_driver(DUMP, &[]).await?;
            (harness, driver)
        };

        let client = harness.client().await?;
        let mut client = client.starttls().await?;

        // The protocol continues over the encrypted stream.
        let banner = client.req("VER").await?;
        assert!(banner.contains("Network UPS Tools"));
        let reply =
            wait_for_reply(&mut client, "GET VAR dev ups.status", "VAR dev ups.status \"OL\"")
                .await?;
        assert_eq!(reply, "VAR dev ups.status \"OL\"");

        // A second upgrade attempt is refused.
        assert_eq!(client.req("STARTTLS").await?, "ERR ALREADY-SSL-MODE");
        Ok(())
    })
}

#[tokio::test]
async fn starttls_unconfigured() -> anyhow::Result<()> {
    local_test!(async {
        let (harness, _driver) = healthy_harness().await?;
        let mut client = harness.client().await?;
        assert_eq!(client.req("STARTTLS").await?, "ERR FEATURE-NOT-CONFIGURED");
        Ok(())
    })
}

#[tokio::test]
async fn tracking_lifecycle() -> anyhow::Result<()> {
    local_test!(async {
        let (harness, mut driver) = healthy_harness().await?;
        let mut client = harness.client().await?;
        client.authenticate("admin", "adminpass").await?;

        assert_eq!(client.req("GET TRACKING").await?, "OFF");
        assert_eq!(client.req("SET TRACKING ON").await?, "OK");
        assert_eq!(client.req("GET TRACKING").await?, "ON");

        let reply = client.req("INSTCMD dev beeper.mute").await?;
        let id = reply
            .strip_prefix("OK TRACKING ")
            .map(str::to_owned)
            .unwrap_or_else(|| format!("unexpected reply: {reply}"));
        assert!(uuid::Uuid::parse_str(&id).is_ok(), "{id}");

        // The driver received the id and completes the command.
        assert_eq!(driver.read_line().await?, format!("INSTCMD beeper.mute TRACKING {id}"));
        assert_eq!(client.req(&format!("GET TRACKING {id}")).await?, "PENDING");

        driver.send(&format!("TRACKING {id} OK")).await?;
        let reply = wait_for_reply(&mut client, &format!("GET TRACKING {id}"), "OK").await?;
        assert_eq!(reply, "OK");

        // Unknown ids read as UNKNOWN while tracking is on.
        assert_eq!(
            client.req("GET TRACKING 3fbf1a78-6e8e-44b8-bd33-8a3ba4749b1d").await?,
            "UNKNOWN"
        );
        Ok(())
    })
}

#[tokio::test]
async fn list_ups_and_descriptions() -> anyhow::Result<()> {
    local_test!(async {
        let (harness, _driver) = healthy_harness().await?;
        let mut client = harness.client().await?;

        let ups = client.req_list("LIST UPS").await?;
        assert_eq!(ups, vec!["UPS dev \"test device\"".to_owned()]);

        assert_eq!(client.req("GET UPSDESC dev").await?, "UPSDESC dev \"test device\"");
        assert_eq!(
            client.req("GET DESC dev battery.charge").await?,
            "DESC dev battery.charge \"Description unavailable\""
        );
        Ok(())
    })
}

#[tokio::test]
async fn commands_list_and_instcmd_authorization() -> anyhow::Result<()> {
    local_test!(async {
        let (harness, mut driver) = healthy_harness().await?;
        let mut client = harness.client().await?;

        let cmds = client.req_list("LIST CMD dev").await?;
        assert_eq!(cmds, vec!["CMD dev shutdown.return".to_owned(), "CMD dev beeper.mute".to_owned()]);

        // monitor has no instcmds at all.
        client.authenticate("monitor", "monpass").await?;
        assert_eq!(client.req("INSTCMD dev shutdown.return").await?, "ERR ACCESS-DENIED");

        let mut admin = harness.client().await?;
        admin.authenticate("admin", "adminpass").await?;
        assert_eq!(admin.req("INSTCMD dev shutdown.return").await?, "OK");
        assert_eq!(driver.read_line().await?, "INSTCMD shutdown.return");
        Ok(())
    })
}

#[tokio::test]
async fn unknown_ups_and_logout() -> anyhow::Result<()> {
    local_test!(async {
        let (harness, _driver) = healthy_harness().await?;
        let mut client = harness.client().await?;

        assert_eq!(client.req("GET VAR ghost ups.status").await?, "ERR UNKNOWN-UPS");
        assert_eq!(client.req("FROB").await?, "ERR UNKNOWN-COMMAND");

        assert_eq!(client.req("LOGOUT").await?, "OK Goodbye");
        assert!(client.req("VER").await.is_err(), "connection should be closed");
        Ok(())
    })
}

#[tokio::test]
async fn driver_reconnect_replaces_the_tree() -> anyhow::Result<()> {
    local_test!(async {
        let (harness, driver) = healthy_harness().await?;
        let mut client = harness.client().await?;
        assert_eq!(client.req("GET VAR dev ups.mfr").await?, "VAR dev ups.mfr \"Fake Power Inc.\"");

        // Driver goes away; queries fail until it returns.
        drop(driver);
        let reply = {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
            loop {
                let reply = client.req("GET VAR dev ups.status").await?;
                if reply.starts_with("ERR") || tokio::time::Instant::now() >= deadline {
                    break reply;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        assert!(
            reply == "ERR DRIVER-NOT-CONNECTED" || reply == "ERR DATA-STALE",
            "unexpected reply: {reply}"
        );

        // The daemon reconnects and asks for a fresh dump; the new dump
        // wholly replaces the old tree.
        let mut harness = harness;
        let driver = harness.drivers.first_mut();
        let mut conn = match driver {
            Some(d) => d.accept().await?,
            None => anyhow::bail!("driver socket missing"),
        };
        conn.serve_dump(&[("ups.status", "OB LB")], &[]).await?;

        let reply = wait_for_reply(
            &mut client,
            "GET VAR dev ups.status",
            "VAR dev ups.status \"OB LB\"",
        )
        .await?;
        assert_eq!(reply, "VAR dev ups.status \"OB LB\"");
        assert_eq!(client.req("GET VAR dev ups.mfr").await?, "ERR VAR-NOT-SUPPORTED");
        Ok(())
    })
}
