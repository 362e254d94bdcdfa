//! Property sink that logs meter readings

use tracing::{debug, info};

use wisun_core::echonet::meter::{
    cumulative_energy_kwh, energy_unit, interpret, Reading, EPC_COEFFICIENT, EPC_ENERGY_UNIT,
};
use wisun_core::echonet::{EchonetObject, Frame, FrameKey, PropertySink, PropertyStore};

/// Keeps the latest values and logs each reading as it arrives
#[derive(Default)]
pub struct LoggingSink {
    store: PropertyStore,
}

impl LoggingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> &PropertyStore {
        &self.store
    }

    /// Cumulative energy in kWh, once the unit has been read
    pub fn energy_kwh(&self, object: EchonetObject, raw: u32) -> Option<f64> {
        let unit = self
            .store
            .get(object, EPC_ENERGY_UNIT)
            .and_then(|v| v.first().copied())
            .and_then(energy_unit)?;
        let coefficient = self
            .store
            .get(object, EPC_COEFFICIENT)
            .and_then(|v| match interpret(EPC_COEFFICIENT, &v) {
                Some(Reading::Coefficient(c)) => Some(c),
                _ => None,
            });
        Some(cumulative_energy_kwh(raw, coefficient, unit))
    }
}

impl PropertySink for LoggingSink {
    fn put(&self, frame: &Frame, key: &FrameKey) {
        self.store.put(frame, key);

        for property in frame.properties() {
            match interpret(property.code, &property.value) {
                Some(Reading::CumulativeEnergy(raw)) => match self.energy_kwh(key.object, raw) {
                    Some(kwh) => info!(object = %key.object, "cumulative energy: {:.1} kWh", kwh),
                    None => info!(object = %key.object, "{}", Reading::CumulativeEnergy(raw)),
                },
                Some(reading) => info!(object = %key.object, "{}", reading),
                None => debug!(object = %key.object, code = property.code, "unhandled property"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wisun_core::echonet::{FrameBuilder, ServiceCode};

    #[test]
    fn test_energy_scaled_after_unit_known() {
        let sink = LoggingSink::new();
        let meter = EchonetObject::LOW_VOLTAGE_SMART_METER;
        assert_eq!(sink.energy_kwh(meter, 100), None);

        let frame = FrameBuilder::new(ServiceCode::GetRes)
            .source(meter)
            .destination(EchonetObject::CONTROLLER)
            .property(EPC_COEFFICIENT, &[0, 0, 0, 10])
            .property(EPC_ENERGY_UNIT, &[0x01])
            .build()
            .unwrap();
        sink.put(&frame, &frame.get_key());

        let kwh = sink.energy_kwh(meter, 100).unwrap();
        assert!((kwh - 100.0).abs() < 1e-9);
        assert_eq!(sink.store().len(), 2);
    }
}
