//! Modbus TCP slave demo.
//!
//! Starts a slave with seeded register data, serves until Ctrl+C, then runs
//! the ordered shutdown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use log::info;
use rand::Rng;
use tokio::signal;

use modbus_slave::{
    ModbusRegisterBank, ModbusSlave, SessionConfig, TcpSlave, TcpSlaveConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    println!("Modbus TCP Slave Demo");
    println!("=====================");

    // Seed the register bank with recognizable data.
    let register_bank = Arc::new(ModbusRegisterBank::new());
    let mut rng = rand::thread_rng();
    for i in 0..50u16 {
        register_bank.write_holding_register(i, 0x1000 + i)?;
        register_bank.write_coil(i, i % 3 == 0)?;
        register_bank.set_input_register(i, rng.gen_range(0..=9999))?;
        register_bank.set_discrete_input(i, i % 2 == 0)?;
    }

    // Count session turnover through the post-close hook.
    let closed_sessions = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&closed_sessions);

    let config = TcpSlaveConfig {
        bind_address: "127.0.0.1:5020".parse()?,
        session: SessionConfig {
            post_close: Some(Arc::new(move |peer| {
                counter.fetch_add(1, Ordering::SeqCst);
                info!("connection from {} closed", peer);
            })),
            ..Default::default()
        },
        register_bank: Some(Arc::clone(&register_bank)),
        ..Default::default()
    };

    let mut slave = TcpSlave::with_config(config)?;
    slave.start().await?;

    println!("Listening on 127.0.0.1:5020");
    println!("Holding registers 0-49 seeded with 0x1000+i, input registers with random values");
    println!("Press Ctrl+C to stop");

    signal::ctrl_c().await?;
    info!("interrupt received, stopping slave");

    slave.stop().await?;

    let stats = slave.stats();
    info!("accepted connections: {}", stats.accepted_connections);
    info!("closed sessions: {}", closed_sessions.load(Ordering::SeqCst));

    println!("Slave stopped");
    Ok(())
}
