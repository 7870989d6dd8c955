use crate::{
    registers::RegisterRanges,
    sensor::{Address, RegisterWrites, Registers},
};
use anyhow::Context as _;
use std::net::SocketAddr;
use tokio_modbus::{client::Context, prelude::*};

/// Modbus TCP connection to a single inverter.
pub struct InverterClient {
    addr: SocketAddr,
    context: Context,
}

impl InverterClient {
    pub async fn connect(addr: SocketAddr, slave_id: u8) -> anyhow::Result<Self> {
        let context = tcp::connect_slave(addr, Slave(slave_id))
            .await
            .with_context(|| format!("Failed to connect to inverter at {addr}"))?;

        log::info!("Connected to inverter at {addr}");

        Ok(Self { addr, context })
    }

    /// Reads every range of the fetch plan, in order, into a single snapshot.
    pub async fn read(&mut self, ranges: &RegisterRanges) -> anyhow::Result<Registers> {
        let mut registers = Registers::new();

        for range in ranges {
            log::debug!("Modbus read: {range}");

            let words = self
                .context
                .read_holding_registers(range.first(), range.len() as u16)
                .await
                .with_context(|| format!("Failed to read {range} from {}", self.addr))?;

            registers.extend(
                (range.first()..=range.last())
                    .zip(words)
                    .map(|(address, word)| (address, word.to_be_bytes())),
            );
        }

        Ok(registers)
    }

    pub async fn write(&mut self, writes: &RegisterWrites) -> anyhow::Result<()> {
        for (first, words) in contiguous_runs(writes) {
            log::info!("Modbus write: {first:#06x} <- {words:04x?}");

            self.context
                .write_multiple_registers(first, &words)
                .await
                .with_context(|| format!("Failed to write register {first:#06x} on {}", self.addr))?;
        }

        Ok(())
    }
}

/// Groups writes to consecutive addresses so each group fits into one request.
pub fn contiguous_runs(writes: &RegisterWrites) -> Vec<(Address, Vec<u16>)> {
    let mut runs: Vec<(Address, Vec<u16>)> = Vec::new();

    for (&address, &bytes) in writes {
        let word = u16::from_be_bytes(bytes);

        match runs.last_mut() {
            Some((first, words)) if *first as u32 + words.len() as u32 == address as u32 => words.push(word),
            _ => runs.push((address, vec![word])),
        }
    }

    runs
}
