use crate::error::{DecodeError, Error};
use crate::monitor::{BusAggregator, UnitSnapshot};
use crate::protocol::{self, ProtocolMessage, MAX_UNITS};
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, Frame as _, Socket, StandardId};
use std::io;
use std::time::Duration;

/// How long `scan` keeps reading after the last request before declaring the
/// cycle ready. Unit replies arrive within a few milliseconds on a quiet
/// 250 kbit/s bus, so this default leaves plenty of slack.
pub const DEFAULT_COLLECTION_WINDOW: Duration = Duration::from_millis(100);

/// Blocking SocketCAN client that owns the scan cycle orchestration: it
/// issues the probe and query frames and feeds every decodable inbound frame
/// to a [`BusAggregator`].
pub struct ZevaBus {
    socket: CanSocket,
    aggregator: BusAggregator,
    window: Duration,
    shunt_millivolts: u16,
    decode_errors: u64,
}

impl ZevaBus {
    pub fn new(interface: &str) -> Result<Self, Error> {
        Ok(Self {
            socket: CanSocket::open(interface)?,
            aggregator: BusAggregator::new(),
            window: DEFAULT_COLLECTION_WINDOW,
            shunt_millivolts: 0,
            decode_errors: 0,
        })
    }

    /// Sets how long to wait for unit responses after issuing requests.
    pub fn set_collection_window(&mut self, window: Duration) {
        self.window = window;
    }

    /// Sets the shunt balancing level carried by query frames. Zero disables
    /// shunting.
    pub fn set_shunt_millivolts(&mut self, millivolts: u16) {
        self.shunt_millivolts = millivolts;
    }

    /// Running count of inbound frames dropped as undecodable. Dropped
    /// frames never abort a scan.
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors
    }

    pub fn aggregator(&self) -> &BusAggregator {
        &self.aggregator
    }

    /// Runs one full scan cycle and returns the number of present units:
    /// reset, probe all 16 addresses for presence, then query each present
    /// unit for voltages and temperatures.
    pub fn scan(&mut self) -> Result<usize, Error> {
        self.aggregator.reset_cycle();

        for unit in 0..MAX_UNITS {
            self.send(&protocol::version_request_frame(unit)?)?;
        }
        self.collect()?;

        let present = self.aggregator.units_present();
        log::debug!("scan found {} present units: {:?}", present.len(), present);
        for &unit in &present {
            self.send(&protocol::query_frame(unit, self.shunt_millivolts)?)?;
        }
        if !present.is_empty() {
            self.collect()?;
        }
        Ok(present.len())
    }

    pub fn units_present(&self) -> Vec<u8> {
        self.aggregator.units_present()
    }

    pub fn snapshot_for(&self, unit: u8) -> Result<UnitSnapshot, Error> {
        self.aggregator.snapshot_for(unit)
    }

    pub fn snapshots(&self) -> Vec<UnitSnapshot> {
        self.aggregator.snapshots()
    }

    fn send(&self, frame: &protocol::Frame) -> Result<(), Error> {
        let id = StandardId::new(frame.id())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "id not standard"))?;
        let can_frame = CanFrame::new(id, frame.data())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "payload too long"))?;
        log::trace!("send id={} data={:02X?}", frame.id(), frame.data());
        self.socket.write_frame(&can_frame)?;
        Ok(())
    }

    /// Reads frames until the collection window passes with nothing new,
    /// applying every decodable message. Undecodable frames are counted,
    /// logged and dropped.
    fn collect(&mut self) -> Result<(), Error> {
        loop {
            match self.socket.read_frame_timeout(self.window) {
                Ok(CanFrame::Data(frame)) => {
                    match decode_can(frame.raw_id(), frame.data()) {
                        Ok(msg) => self.aggregator.apply(&msg),
                        Err(err) => {
                            self.decode_errors += 1;
                            log::warn!(
                                "dropping frame id={} len={}: {}",
                                frame.raw_id(),
                                frame.data().len(),
                                err
                            );
                        }
                    }
                }
                // Remote and error frames are not protocol traffic.
                Ok(_) => continue,
                Err(err)
                    if err.kind() == io::ErrorKind::WouldBlock
                        || err.kind() == io::ErrorKind::TimedOut =>
                {
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

fn decode_can(raw_id: u32, data: &[u8]) -> Result<ProtocolMessage, DecodeError> {
    let id = u16::try_from(raw_id).map_err(|_| DecodeError::UnknownIdentifier(raw_id))?;
    let frame = protocol::Frame::new(id, data)?;
    protocol::decode(&frame)
}
