//! OS8104A register map and the bring-up register table.
//!
//! Addresses and bit values are chip constants and must stay bit-exact.

use crate::domain::SampleRate;

// Register addresses
pub const REG_XCR: u8 = 0x80;
pub const REG_XSR: u8 = 0x81;
pub const REG_SDC1: u8 = 0x82;
pub const REG_CM1: u8 = 0x83;
pub const REG_NC: u8 = 0x84;
pub const REG_MSGC: u8 = 0x85;
pub const REG_MSGS: u8 = 0x86;
pub const REG_NPR: u8 = 0x87;
pub const REG_IE: u8 = 0x88;
pub const REG_GA: u8 = 0x89;
pub const REG_NAH: u8 = 0x8a;
pub const REG_NAL: u8 = 0x8b;
pub const REG_SDC2: u8 = 0x8c;
pub const REG_SDC3: u8 = 0x8d;
pub const REG_CM2: u8 = 0x8e;
pub const REG_NDR: u8 = 0x8f;
pub const REG_MPR: u8 = 0x90;
pub const REG_MDR: u8 = 0x91;
pub const REG_CM3: u8 = 0x92;
pub const REG_CM4: u8 = 0x93;
pub const REG_FRHL: u8 = 0x94;
pub const REG_FRLO: u8 = 0x95;
pub const REG_SBC: u8 = 0x96;
pub const REG_XSR2: u8 = 0x97;
/// Receive control message buffer
pub const REG_MRCMB: u8 = 0xa0;
pub const REG_XTIM: u8 = 0xbe;
pub const REG_XRTY: u8 = 0xbf;
/// Transmit control message buffer, also the request mailbox
pub const REG_MXCMB: u8 = 0xc0;
pub const REG_XTS: u8 = 0xd5;
pub const REG_PCTC: u8 = 0xe2;
pub const REG_PCTS: u8 = 0xe3;
pub const REG_APAH: u8 = 0xe8;
pub const REG_APAL: u8 = 0xe9;
pub const REG_PSTX: u8 = 0xea;
pub const REG_PLDT: u8 = 0xec;
pub const REG_PPI: u8 = 0xf2;

// bXCR transceiver control
pub const XCR_MASTER: u8 = 0x80;
pub const XCR_SLAVE: u8 = 0x00;
pub const XCR_OUTPUT_ENABLE: u8 = 0x40;
pub const XCR_LEGACY_BYPASS: u8 = 0x20;
pub const XCR_ENHANCED_BYPASS: u8 = 0x00;
pub const XCR_LOWPOWER_WAKE_DIS: u8 = 0x10;
pub const XCR_STANDALONE_EN: u8 = 0x08;
pub const XCR_SOURCE_BYPASS_EN: u8 = 0x04;
pub const XCR_ALL_BYPASS_DIS: u8 = 0x02;
pub const XCR_REN_DIS: u8 = 0x01;

// bXSR transceiver status
pub const XSR_FREQ_REG_ACT: u8 = 0x80;
pub const XSR_SPDIF_ERR_MASK: u8 = 0x40;
pub const XSR_LOCK_ERR_MASK: u8 = 0x20;
pub const XSR_CODING_ERR_MASK: u8 = 0x10;
pub const XSR_ERR_ACT: u8 = 0x08;
pub const XSR_FREQ_REG_LOCKED: u8 = 0x04;
pub const XSR_SPDIF_LOCK_ACT: u8 = 0x02;
pub const XSR_TRANS_LOCK_ACT: u8 = 0x01;

// bSDC1 source data control
pub const SDC1_ACTIVE_EDGE_EN: u8 = 0x80;
pub const SDC1_DELAY_FIRST_BIT_EN: u8 = 0x40;
pub const SDC1_POLARITY_FSY_RISING: u8 = 0x20;
pub const SDC1_POLARITY_FSY_FALLING: u8 = 0x00;
pub const SDC1_SCK_OUTPUT: u8 = 0x10;
pub const SDC1_NO_CYCLES_DEF: u8 = 0x00;
pub const SDC1_NO_CYCLES_DIV: u8 = 0x08;
pub const SDC1_SPDIF_EN: u8 = 0x04;
pub const SDC1_SPDIF_DIS: u8 = 0x00;
pub const SDC1_UNMUTE_SOURCE: u8 = 0x02;
pub const SDC1_TRANSPARENT_DIS: u8 = 0x01;

// bCM1 clock manager 1
pub const CM1_PLL_DISABLE: u8 = 0x80;
pub const CM1_PLL_ENABLE: u8 = 0x00;
pub const CM1_CRYSTAL_DIVIDER_256F: u8 = 0x00;
pub const CM1_CRYSTAL_DIVIDER_384F: u8 = 0x04;
pub const CM1_PLL_INPUT_MOST: u8 = 0x00;
pub const CM1_PLL_INPUT_SR0: u8 = 0x01;
pub const CM1_PLL_INPUT_CRYSTAL: u8 = 0x02;
pub const CM1_PLL_INPUT_SCK: u8 = 0x03;

// bMSGC message control
pub const MSGC_START_TX: u8 = 0x80;
pub const MSGC_RECEIVE_BUFF_EN: u8 = 0x40;
pub const MSGC_START_ADDRESS_INIT_EN: u8 = 0x10;
pub const MSGC_RESET_NET_CONF_CHANGE: u8 = 0x08;
pub const MSGC_RESET_ERR_INT: u8 = 0x04;
pub const MSGC_RESET_MESSAGE_TX_INT: u8 = 0x02;
pub const MSGC_RESET_MESSAGE_RX_INT: u8 = 0x01;

// bMSGS message status
pub const MSGS_RECEIVE_BUFF_FULL: u8 = 0x80;
pub const MSGS_TRANS_SUCCESS: u8 = 0x40;
pub const MSGS_NET_CHANGED: u8 = 0x08;
pub const MSGS_ERR: u8 = 0x04;
pub const MSGS_MESS_TRANSMITTED: u8 = 0x02;
pub const MSGS_MESS_RECEIVED: u8 = 0x01;

// bIE interrupt enable
pub const IE_NET_CHANGED_INT_EN: u8 = 0x08;
pub const IE_ERR_INT_EN: u8 = 0x04;
pub const IE_TX_INT_EN: u8 = 0x02;
pub const IE_RX_INT_EN: u8 = 0x01;

// bSDC2 source data control 2
pub const SDC2_SCK_8F: u8 = 0x00;
pub const SDC2_SCK_16F: u8 = 0x20;
pub const SDC2_SCK_32F: u8 = 0x40;
pub const SDC2_SCK_64F: u8 = 0x60;

// bCM2 clock manager 2
pub const CM2_UNLOCKED: u8 = 0x80;
pub const CM2_NETWORK_ACTIVITY: u8 = 0x40;

// bSDC3 source data control 3
pub const SDC3_MUTE_SOURCE_PORTS: u8 = 0x02;
pub const SDC3_SOURCE_PORT_DIS: u8 = 0x01;

// bCM3 clock manager 3
pub const CM3_FREN_EN: u8 = 0x10;
pub const CM3_FREN_DIS: u8 = 0x00;
pub const CM3_ENH: u8 = 0x40;
pub const CM3_AUTO_SWITCH_CLOCK: u8 = 0x08;
pub const CM3_DIS_AUTO_SWITCH_CLOCK: u8 = 0x00;
pub const CM3_AUTO_CRYSTAL_EN: u8 = 0x04;
pub const CM3_AUTO_CRYSTAL_DIS: u8 = 0x00;
pub const CM3_FREQ_REG_RESET: u8 = 0x02;

/// Routing-table entries of the local sink (source port 1, bytes 0..3)
pub const SINK_ROUTING: [u8; 4] = [0x46, 0x56, 0x66, 0x76];

/// Routing-table value marking an entry as unrouted
pub const ROUTING_UNUSED: u8 = 0xf8;

/// Source port data written into allocated channel locations when streaming
pub const STREAM_SOURCE_DATA: [u8; 4] = [0x49, 0x59, 0x69, 0x79];

/// One register write of the bring-up table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWrite {
    pub address: u8,
    pub value: u8,
}

const fn reg(address: u8, value: u8) -> RegisterWrite {
    RegisterWrite { address, value }
}

/// Clocking mode the chip is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    /// PLL locks to the network, legacy bypass
    Legacy,
    /// PLL locks to the local crystal
    Enhanced,
}

impl ClockMode {
    /// Pick the clocking mode from the probed bXCR value and the requested
    /// sample rate. The crystal cannot derive 44.1 kHz.
    pub fn select(xcr_probe: u8, sample_rate: SampleRate) -> Self {
        if xcr_probe & XCR_LEGACY_BYPASS != 0 || sample_rate == SampleRate::Khz44_1 {
            Self::Legacy
        } else {
            Self::Enhanced
        }
    }
}

/// Node identity written during bring-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSetup {
    pub node_address: u16,
    pub group_address: u8,
    pub sample_rate: SampleRate,
}

/// Build the ordered register table applied once at bring-up.
///
/// Interrupt enable and interrupt reset come last so no interrupt can fire
/// against a half-configured chip.
pub fn register_table(setup: &NodeSetup, mode: ClockMode) -> Vec<RegisterWrite> {
    let [address_high, address_low] = setup.node_address.to_be_bytes();
    let (pll_input, divider, bypass) = match mode {
        ClockMode::Enhanced => (
            CM1_PLL_INPUT_CRYSTAL,
            CM1_CRYSTAL_DIVIDER_384F,
            XCR_ENHANCED_BYPASS,
        ),
        ClockMode::Legacy => (
            CM1_PLL_INPUT_MOST,
            CM1_CRYSTAL_DIVIDER_256F,
            XCR_LEGACY_BYPASS,
        ),
    };

    let mut table = vec![
        reg(REG_NAH, address_high),
        reg(REG_NAL, address_low),
        reg(REG_GA, setup.group_address),
        reg(REG_CM1, CM1_PLL_ENABLE | pll_input | divider),
    ];
    if mode == ClockMode::Legacy {
        table.push(reg(REG_SDC3, SDC3_MUTE_SOURCE_PORTS | SDC3_SOURCE_PORT_DIS));
        table.push(reg(
            REG_CM3,
            CM3_FREN_DIS | CM3_AUTO_CRYSTAL_DIS | CM3_DIS_AUTO_SWITCH_CLOCK | CM3_FREQ_REG_RESET,
        ));
    }
    table.extend([
        reg(
            REG_XCR,
            XCR_SLAVE | XCR_OUTPUT_ENABLE | bypass | XCR_ALL_BYPASS_DIS | XCR_REN_DIS,
        ),
        reg(
            REG_SDC1,
            SDC1_ACTIVE_EDGE_EN
                | SDC1_DELAY_FIRST_BIT_EN
                | SDC1_POLARITY_FSY_FALLING
                | SDC1_NO_CYCLES_DEF
                | SDC1_SCK_OUTPUT
                | SDC1_TRANSPARENT_DIS
                | SDC1_UNMUTE_SOURCE
                | SDC1_SPDIF_DIS,
        ),
        reg(REG_SDC2, SDC2_SCK_32F),
        reg(
            REG_XSR,
            XSR_CODING_ERR_MASK | XSR_SPDIF_ERR_MASK | XSR_LOCK_ERR_MASK,
        ),
        reg(REG_IE, IE_RX_INT_EN | IE_ERR_INT_EN | IE_TX_INT_EN),
        reg(
            REG_MSGC,
            MSGC_RESET_MESSAGE_RX_INT
                | MSGC_RESET_MESSAGE_TX_INT
                | MSGC_RESET_ERR_INT
                | MSGC_RESET_NET_CONF_CHANGE,
        ),
    ]);
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(sample_rate: SampleRate) -> NodeSetup {
        NodeSetup {
            node_address: 0x0110,
            group_address: 0x22,
            sample_rate,
        }
    }

    #[test]
    fn enhanced_table_is_bit_exact() {
        let table = register_table(&setup(SampleRate::Khz48), ClockMode::Enhanced);
        let pairs: Vec<(u8, u8)> = table.iter().map(|w| (w.address, w.value)).collect();
        assert_eq!(
            pairs,
            vec![
                (0x8a, 0x01),
                (0x8b, 0x10),
                (0x89, 0x22),
                (0x83, 0x06),
                (0x80, 0x43),
                (0x82, 0xd3),
                (0x8c, 0x40),
                (0x81, 0x70),
                (0x88, 0x07),
                (0x85, 0x0f),
            ]
        );
    }

    #[test]
    fn legacy_table_adds_port_and_clock_writes() {
        let table = register_table(&setup(SampleRate::Khz48), ClockMode::Legacy);
        let pairs: Vec<(u8, u8)> = table.iter().map(|w| (w.address, w.value)).collect();
        assert_eq!(pairs[3], (0x83, 0x00));
        assert_eq!(pairs[4], (0x8d, 0x03));
        assert_eq!(pairs[5], (0x92, 0x02));
        assert_eq!(pairs[6], (0x80, 0x63));
        assert_eq!(pairs.len(), 12);
    }

    #[test]
    fn interrupt_enable_precedes_only_interrupt_reset() {
        let table = register_table(&setup(SampleRate::Khz48), ClockMode::Enhanced);
        let ie = table.iter().position(|w| w.address == REG_IE).unwrap();
        let nah = table.iter().position(|w| w.address == REG_NAH).unwrap();
        assert!(nah < ie);
        assert_eq!(table.last().map(|w| w.address), Some(REG_MSGC));
    }

    #[test]
    fn clock_mode_follows_probe_and_sample_rate() {
        assert_eq!(ClockMode::select(0x00, SampleRate::Khz48), ClockMode::Enhanced);
        assert_eq!(ClockMode::select(0x20, SampleRate::Khz48), ClockMode::Legacy);
        assert_eq!(ClockMode::select(0x00, SampleRate::Khz44_1), ClockMode::Legacy);
    }
}
