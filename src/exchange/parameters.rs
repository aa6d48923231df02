//! Per-exchange radio parameters.

/// Transmit power level for one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmissionPower {
    Lowest,
    BelowNormal,
    Normal,
    AboveNormal,
    Highest,
}

/// Value object controlling one radio exchange.
///
/// The standard parameter set is just the next nonce with automatic level
/// adjustment; pairing and the critical delivery messages layer overrides on
/// top via the `with_*` methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeParameters {
    /// Nonce the pod expects on this message.
    pub nonce: u32,
    /// Let the radio walk its power level while retrying.
    pub allow_auto_level_adjustment: bool,
    /// Send to this address instead of the pod's assigned one.
    pub address_override: Option<u32>,
    /// Expect acknowledgements addressed here.
    pub ack_address_override: Option<u32>,
    /// Fixed transmit power for this exchange.
    pub transmission_power_override: Option<TransmissionPower>,
    /// Use this message sequence instead of the tracked one (0..15).
    pub message_sequence_override: Option<u8>,
    /// Transmit the first packet twice.
    pub repeat_first_packet: bool,
    /// Critical delivery command: the pod must confirm with a follow-up.
    pub critical_with_followup_required: bool,
}

impl ExchangeParameters {
    /// The standard parameter set for a given nonce.
    pub fn new(nonce: u32) -> Self {
        Self {
            nonce,
            allow_auto_level_adjustment: true,
            address_override: None,
            ack_address_override: None,
            transmission_power_override: None,
            message_sequence_override: None,
            repeat_first_packet: false,
            critical_with_followup_required: false,
        }
    }

    /// Overrides the destination address.
    pub fn with_address_override(mut self, address: u32) -> Self {
        self.address_override = Some(address);
        self
    }

    /// Overrides the acknowledgement address.
    pub fn with_ack_address_override(mut self, address: u32) -> Self {
        self.ack_address_override = Some(address);
        self
    }

    /// Pins the transmit power.
    pub fn with_transmission_power(mut self, power: TransmissionPower) -> Self {
        self.transmission_power_override = Some(power);
        self
    }

    /// Overrides the message sequence.
    pub fn with_message_sequence(mut self, sequence: u8) -> Self {
        self.message_sequence_override = Some(sequence & 0x0F);
        self
    }

    /// Disables automatic power level adjustment.
    pub fn without_auto_level_adjustment(mut self) -> Self {
        self.allow_auto_level_adjustment = false;
        self
    }

    /// Transmits the first packet twice.
    pub fn with_repeat_first_packet(mut self) -> Self {
        self.repeat_first_packet = true;
        self
    }

    /// Marks the exchange critical with a required follow-up.
    pub fn with_critical_followup(mut self) -> Self {
        self.critical_with_followup_required = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_parameters_defaults() {
        let params = ExchangeParameters::new(0xD012_FA62);
        assert_eq!(params.nonce, 0xD012_FA62);
        assert!(params.allow_auto_level_adjustment);
        assert!(params.address_override.is_none());
        assert!(params.ack_address_override.is_none());
        assert!(params.transmission_power_override.is_none());
        assert!(params.message_sequence_override.is_none());
        assert!(!params.repeat_first_packet);
        assert!(!params.critical_with_followup_required);
    }

    #[test]
    fn test_pairing_overrides() {
        let params = ExchangeParameters::new(1)
            .with_address_override(0xFFFF_FFFF)
            .with_ack_address_override(0x1F0E_89F1)
            .with_transmission_power(TransmissionPower::BelowNormal)
            .without_auto_level_adjustment();
        assert_eq!(params.address_override, Some(0xFFFF_FFFF));
        assert_eq!(params.ack_address_override, Some(0x1F0E_89F1));
        assert_eq!(
            params.transmission_power_override,
            Some(TransmissionPower::BelowNormal)
        );
        assert!(!params.allow_auto_level_adjustment);
    }

    #[test]
    fn test_message_sequence_is_masked_to_nibble() {
        let params = ExchangeParameters::new(1).with_message_sequence(17);
        assert_eq!(params.message_sequence_override, Some(1));
    }

    #[test]
    fn test_critical_delivery_flags() {
        let params = ExchangeParameters::new(1)
            .with_repeat_first_packet()
            .with_critical_followup();
        assert!(params.repeat_first_packet);
        assert!(params.critical_with_followup_required);
    }
}
