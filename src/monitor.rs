use crate::error::Error;
use crate::protocol::{FirmwareVersion, ProtocolMessage, MAX_UNITS};
use std::collections::BTreeMap;
use std::time::Instant;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Accumulated status of one addressable unit.
///
/// Owned exclusively by [`BusAggregator`]; mutated only through message
/// application and the cycle reset.
#[derive(Debug, Clone)]
pub struct UnitState {
    unit: u8,
    present: bool,
    cell_millivolts: BTreeMap<u8, u16>,
    temperatures: BTreeMap<u8, i8>,
    version: Option<FirmwareVersion>,
    last_update: Option<Instant>,
}

impl UnitState {
    fn new(unit: u8) -> Self {
        Self {
            unit,
            present: false,
            cell_millivolts: BTreeMap::new(),
            temperatures: BTreeMap::new(),
            version: None,
            last_update: None,
        }
    }

    pub fn unit(&self) -> u8 {
        self.unit
    }

    pub fn is_present(&self) -> bool {
        self.present
    }

    /// Marks the unit as seen this cycle. Idempotent.
    pub fn mark_present(&mut self) {
        self.present = true;
        self.touch();
    }

    /// Records one cell voltage. The last write for a given index within a
    /// cycle wins; the protocol has no sequence numbers.
    pub fn set_cell_voltage(&mut self, cell: u8, millivolts: u16) {
        self.cell_millivolts.insert(cell, millivolts);
        self.touch();
    }

    pub fn set_temperature(&mut self, sensor: u8, celsius: i8) {
        self.temperatures.insert(sensor, celsius);
        self.touch();
    }

    pub fn set_version(&mut self, version: FirmwareVersion) {
        self.version = Some(version);
        self.touch();
    }

    /// Clears presence and all readings; called at the start of a scan cycle.
    pub fn reset(&mut self) {
        self.present = false;
        self.cell_millivolts.clear();
        self.temperatures.clear();
        self.version = None;
        self.last_update = None;
    }

    /// Instant of the most recent update in this cycle, if any.
    pub fn last_update(&self) -> Option<Instant> {
        self.last_update
    }

    /// Read-only copy for display, with readings ordered by index.
    pub fn snapshot(&self) -> UnitSnapshot {
        UnitSnapshot {
            unit: self.unit,
            present: self.present,
            cell_millivolts: self.cell_millivolts.iter().map(|(&c, &mv)| (c, mv)).collect(),
            temperatures: self.temperatures.iter().map(|(&s, &t)| (s, t)).collect(),
            version: self.version,
        }
    }

    fn touch(&mut self) {
        self.last_update = Some(Instant::now());
    }
}

/// Point-in-time view of one unit, detached from the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UnitSnapshot {
    pub unit: u8,
    pub present: bool,
    /// (cell index, millivolts) pairs, ascending by cell index. A missing
    /// index means that cell was not reported this cycle.
    pub cell_millivolts: Vec<(u8, u16)>,
    /// (sensor index, degrees C) pairs, ascending by sensor index.
    pub temperatures: Vec<(u8, i8)>,
    pub version: Option<FirmwareVersion>,
}

/// Tracks all 16 unit addresses across one scan cycle.
///
/// Message arrival order is irrelevant to the final state, except that the
/// last write for a given (unit, cell) pair wins. No cross-message
/// correlation or sequencing happens here; the real protocol has none.
#[derive(Debug, Clone)]
pub struct BusAggregator {
    units: Vec<UnitState>,
}

impl Default for BusAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl BusAggregator {
    /// All 16 units start absent with empty voltage tables.
    pub fn new() -> Self {
        Self {
            units: (0..MAX_UNITS).map(UnitState::new).collect(),
        }
    }

    /// Resets every unit to absent/empty; call before issuing a scan.
    pub fn reset_cycle(&mut self) {
        for unit in &mut self.units {
            unit.reset();
        }
    }

    /// Folds one decoded message into the per-unit state. Host-to-unit
    /// traffic carries no status and is a no-op.
    pub fn apply(&mut self, message: &ProtocolMessage) {
        match message {
            ProtocolMessage::UnitPresenceReport { unit, version } => {
                let state = &mut self.units[*unit as usize];
                state.mark_present();
                state.set_version(*version);
                log::trace!("unit {} present, firmware {}", unit, version);
            }
            ProtocolMessage::CellVoltageReport {
                unit,
                first_cell,
                millivolts,
            } => {
                let state = &mut self.units[*unit as usize];
                for (offset, &mv) in millivolts.iter().enumerate() {
                    state.set_cell_voltage(first_cell + offset as u8, mv);
                }
            }
            ProtocolMessage::TemperatureReport { unit, celsius } => {
                let state = &mut self.units[*unit as usize];
                for (sensor, &degrees) in celsius.iter().enumerate() {
                    state.set_temperature(sensor as u8, degrees);
                }
            }
            ProtocolMessage::Query { .. } | ProtocolMessage::VersionRequest { .. } => {}
        }
    }

    /// Addresses of units that reported presence this cycle, ascending.
    pub fn units_present(&self) -> Vec<u8> {
        self.units
            .iter()
            .filter(|u| u.is_present())
            .map(UnitState::unit)
            .collect()
    }

    /// Snapshot of one unit. Fails with [`Error::UnitNotFound`] for an
    /// address outside 0..=15, which is caller misuse rather than a bus
    /// condition.
    pub fn snapshot_for(&self, unit: u8) -> Result<UnitSnapshot, Error> {
        self.units
            .get(unit as usize)
            .map(UnitState::snapshot)
            .ok_or(Error::UnitNotFound(unit))
    }

    /// Snapshots of all present units, ascending by address.
    pub fn snapshots(&self) -> Vec<UnitSnapshot> {
        self.units
            .iter()
            .filter(|u| u.is_present())
            .map(UnitState::snapshot)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presence(unit: u8) -> ProtocolMessage {
        ProtocolMessage::UnitPresenceReport {
            unit,
            version: FirmwareVersion {
                major: 2,
                minor: 4,
                patch: 1,
            },
        }
    }

    #[test]
    fn fresh_aggregator_has_no_present_units() {
        let mut agg = BusAggregator::new();
        agg.reset_cycle();
        assert!(agg.units_present().is_empty());
        for unit in 0..MAX_UNITS {
            let snap = agg.snapshot_for(unit).unwrap();
            assert!(!snap.present);
            assert!(snap.cell_millivolts.is_empty());
        }
    }

    #[test]
    fn voltage_report_round_trips_through_snapshot() {
        let mut agg = BusAggregator::new();
        agg.apply(&ProtocolMessage::CellVoltageReport {
            unit: 7,
            first_cell: 4,
            millivolts: [3650, 3640, 3660, 65535],
        });
        let snap = agg.snapshot_for(7).unwrap();
        assert_eq!(
            snap.cell_millivolts,
            vec![(4, 3650), (5, 3640), (6, 3660), (7, 65535)]
        );
    }

    #[test]
    fn mark_present_is_idempotent() {
        let mut agg = BusAggregator::new();
        agg.apply(&presence(9));
        let once = agg.snapshot_for(9).unwrap();
        agg.apply(&presence(9));
        assert_eq!(agg.snapshot_for(9).unwrap(), once);
        assert_eq!(agg.units_present(), vec![9]);
    }

    #[test]
    fn last_write_wins_within_a_cycle() {
        let mut agg = BusAggregator::new();
        agg.apply(&ProtocolMessage::CellVoltageReport {
            unit: 3,
            first_cell: 0,
            millivolts: [3700, 3700, 3700, 3700],
        });
        agg.apply(&ProtocolMessage::CellVoltageReport {
            unit: 3,
            first_cell: 0,
            millivolts: [3700, 3700, 3690, 3700],
        });
        let snap = agg.snapshot_for(3).unwrap();
        assert_eq!(snap.cell_millivolts[2], (2, 3690));
    }

    #[test]
    fn presence_and_voltages_for_one_unit() {
        let mut agg = BusAggregator::new();
        agg.reset_cycle();
        agg.apply(&ProtocolMessage::CellVoltageReport {
            unit: 5,
            first_cell: 0,
            millivolts: [3650, 3640, 3660, 3655],
        });
        agg.apply(&presence(5));
        assert_eq!(agg.units_present(), vec![5]);
        let snap = agg.snapshot_for(5).unwrap();
        assert!(snap.present);
        assert_eq!(
            snap.cell_millivolts,
            vec![(0, 3650), (1, 3640), (2, 3660), (3, 3655)]
        );
        // Units that never responded stay absent and are omitted.
        assert!(agg.snapshots().iter().all(|s| s.unit == 5));
    }

    #[test]
    fn arrival_order_is_irrelevant() {
        let reports = [
            presence(2),
            ProtocolMessage::CellVoltageReport {
                unit: 2,
                first_cell: 8,
                millivolts: [3601, 3602, 3603, 3604],
            },
            ProtocolMessage::CellVoltageReport {
                unit: 2,
                first_cell: 0,
                millivolts: [3611, 3612, 3613, 3614],
            },
            ProtocolMessage::TemperatureReport {
                unit: 2,
                celsius: [21, 22],
            },
        ];
        let mut forward = BusAggregator::new();
        for msg in &reports {
            forward.apply(msg);
        }
        let mut backward = BusAggregator::new();
        for msg in reports.iter().rev() {
            backward.apply(msg);
        }
        assert_eq!(
            forward.snapshot_for(2).unwrap(),
            backward.snapshot_for(2).unwrap()
        );
    }

    #[test]
    fn temperature_report_fills_both_sensors() {
        let mut agg = BusAggregator::new();
        agg.apply(&ProtocolMessage::TemperatureReport {
            unit: 0,
            celsius: [21, -15],
        });
        let snap = agg.snapshot_for(0).unwrap();
        assert_eq!(snap.temperatures, vec![(0, 21), (1, -15)]);
    }

    #[test]
    fn host_traffic_is_a_no_op() {
        let mut agg = BusAggregator::new();
        agg.apply(&ProtocolMessage::Query {
            unit: 4,
            shunt_millivolts: 3500,
        });
        agg.apply(&ProtocolMessage::VersionRequest { unit: 4 });
        assert!(agg.units_present().is_empty());
        assert!(agg.snapshot_for(4).unwrap().cell_millivolts.is_empty());
    }

    #[test]
    fn snapshot_for_out_of_range_unit_fails() {
        let agg = BusAggregator::new();
        assert!(matches!(agg.snapshot_for(16), Err(Error::UnitNotFound(16))));
        assert!(matches!(
            agg.snapshot_for(255),
            Err(Error::UnitNotFound(255))
        ));
    }

    #[test]
    fn reset_mid_collection_clears_everything() {
        let mut agg = BusAggregator::new();
        agg.apply(&presence(1));
        agg.apply(&ProtocolMessage::CellVoltageReport {
            unit: 1,
            first_cell: 0,
            millivolts: [3650, 3650, 3650, 3650],
        });
        agg.apply(&presence(12));
        agg.reset_cycle();
        assert!(agg.units_present().is_empty());
        let snap = agg.snapshot_for(1).unwrap();
        assert!(!snap.present);
        assert!(snap.cell_millivolts.is_empty());
        assert!(snap.version.is_none());
    }

    #[test]
    fn unit_state_tracks_last_update() {
        let mut state = UnitState::new(6);
        assert!(state.last_update().is_none());
        state.mark_present();
        assert!(state.last_update().is_some());
        state.reset();
        assert!(state.last_update().is_none());
    }
}
