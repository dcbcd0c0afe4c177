use crate::*;

use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

/// A command for a registered actuator opens one connection to its command
/// port carrying a single COMANDO envelope.
#[tokio::test]
async fn test_command_reaches_actuator() -> Result<()> {
    let gw = start_gateway().await?;
    let device = TcpListener::bind("127.0.0.1:0").await?;
    let port = device.local_addr()?.port();

    let mut client = gw.connect_ready().await?;
    gw.announce("semaforo", port, DeviceKind::Actuator).await?;
    client.expect(&format!("[REGISTRO] semaforo:ATUADOR:{port}")).await?;

    client.send("semaforo:VERDE:30").await?;

    let (mut conn, _) = tokio::time::timeout(LINE_TIMEOUT, device.accept())
        .await
        .context("gateway never connected to the device")??;
    let mut payload = Vec::new();
    tokio::time::timeout(LINE_TIMEOUT, conn.read_to_end(&mut payload))
        .await
        .context("gateway did not close the command connection")??;

    match Message::decode(&payload)? {
        Message::Command { origin_id, command } => {
            assert_eq!(origin_id, "gateway");
            assert_eq!(command.action, "VERDE");
            assert_eq!(command.param, "30");
        }
        other => panic!("expected COMANDO, got {:?}", other.kind()),
    }

    client.expect("[OK] Comando enviado para semaforo").await?;
    gw.stop().await
}

/// Commands for unknown ids are acknowledged and leave the registry alone.
#[tokio::test]
async fn test_command_for_unknown_device() -> Result<()> {
    let gw = start_gateway().await?;
    let mut client = gw.connect_ready().await?;

    client.send("fantasma:LIGAR:1").await?;
    client.expect("[OK] Comando enviado para fantasma").await?;
    assert!(gw.registry.is_empty());

    gw.stop().await
}

/// An auto-registered sensor has no command channel; the command is
/// acknowledged and nothing is sent.
#[tokio::test]
async fn test_command_for_sensor_only_device() -> Result<()> {
    let gw = start_gateway().await?;
    let mut client = gw.connect_ready().await?;

    gw.report("termometro", 19.0, "C", "TEMPERATURA").await?;
    client.expect("[REGISTRO] termometro:SENSOR:0").await?;
    client.expect("[termometro] TEMPERATURA: 19.0 C").await?;

    client.send("termometro:CALIBRAR:0").await?;
    client.expect("[OK] Comando enviado para termometro").await?;

    gw.stop().await
}

/// Command delivery to a device that is gone does not affect the session.
#[tokio::test]
async fn test_command_to_unreachable_device() -> Result<()> {
    let gw = start_gateway().await?;
    let port = {
        let closed = TcpListener::bind("127.0.0.1:0").await?;
        closed.local_addr()?.port()
    };

    let mut client = gw.connect_ready().await?;
    gw.announce("camera", port, DeviceKind::Actuator).await?;
    client.expect(&format!("[REGISTRO] camera:ATUADOR:{port}")).await?;

    client.send("camera:FOTO:").await?;
    client.expect("[OK] Comando enviado para camera").await?;
    client.send("LISTAR").await?;
    client.expect(&format!("[REGISTRO] camera:ATUADOR:{port}")).await?;

    gw.stop().await
}

/// Malformed lines get the usage hint and the session stays open.
#[tokio::test]
async fn test_format_errors_keep_session_open() -> Result<()> {
    let gw = start_gateway().await?;
    let mut client = gw.connect_ready().await?;

    for bad in ["semaforo:VERDE", "a:b:c:d", ":LIGAR:1", "semaforo::1", "listar"] {
        client.send(bad).await?;
        client.expect(FORMAT_ERROR).await?;
    }

    // Blank lines are ignored.
    client.send("").await?;
    client.send("   ").await?;
    client.sync().await?;

    gw.stop().await
}

/// DISCOVERY on a control session is acknowledged.
#[tokio::test]
async fn test_discovery_request_is_acknowledged() -> Result<()> {
    let gw = start_gateway().await?;
    let mut client = gw.connect_ready().await?;

    client.send("DISCOVERY").await?;
    client.expect("[OK] DISCOVERY enviado").await?;

    gw.stop().await
}

/// A client that disappears is dropped from the fan-out without affecting
/// the others.
#[tokio::test]
async fn test_fan_out_survives_departed_client() -> Result<()> {
    let gw = start_gateway().await?;
    let mut a = gw.connect_ready().await?;
    let b = gw.connect_ready().await?;
    let mut c = gw.connect_ready().await?;
    wait_until(|| gw.clients.len() == 3).await?;

    drop(b);
    for i in 0..5 {
        gw.report("termometro", 20.0 + f64::from(i), "C", "TEMPERATURA").await?;
    }

    for client in [&mut a, &mut c] {
        client.expect("[REGISTRO] termometro:SENSOR:0").await?;
        for i in 0..5 {
            client
                .expect(&format!("[termometro] TEMPERATURA: {:.1} C", 20.0 + f64::from(i)))
                .await?;
        }
    }
    wait_until(|| gw.clients.len() == 2).await?;

    gw.stop().await
}

/// An over-long line is answered with the usage hint once, without being
/// buffered, and the session keeps working afterwards.
#[tokio::test]
async fn test_over_long_line_is_rejected() -> Result<()> {
    let gw = start_gateway().await?;
    let mut client = gw.connect_ready().await?;

    let flood = "x".repeat(1024 * 1024);
    client.send(&flood).await?;
    client.expect(FORMAT_ERROR).await?;

    client.send("fantasma:LIGAR:1").await?;
    client.expect("[OK] Comando enviado para fantasma").await?;

    gw.stop().await
}
