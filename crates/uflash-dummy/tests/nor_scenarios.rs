//! End-to-end SPI-NOR scenarios against the emulated chip
//!
//! Everything here goes through the real stack: SPI-MEM packing into generic
//! transfers, the probe engine, SFDP parsing, mode transitions, the register
//! engine. The dummy chip parses the produced wire bytes like silicon would.

use uflash_core::controller::ControllerCaps;
use uflash_core::db::NorDatabase;
use uflash_core::error::Error;
use uflash_core::nor::part::WpRange;
use uflash_core::spi::{IoCaps, IoType};
use uflash_core::{SpiBus, SpiNor};
use uflash_dummy::{build_sfdp_blob, DummyController, DummyNor, DummyNorConfig};

const DB_JSON: &str = r#"{
  "vendors": [
    {
      "id": "winbond",
      "name": "Winbond",
      "parts": [
        {
          "model": "W25Q128FV",
          "ids": [[239, 64, 24]],
          "size": 16777216,
          "page_size": 256,
          "flags": ["unique-id"],
          "erase": [
            { "opcode": "0x20", "size": 4096 },
            { "opcode": "0x52", "size": 32768 },
            { "opcode": "0xD8", "size": 65536 }
          ],
          "read": [
            { "io": "1-1-1", "opcode": "0x0B", "ndummy": 8 },
            { "io": "1-1-2", "opcode": "0x3B", "ndummy": 8 },
            { "io": "1-1-4", "opcode": "0x6B", "ndummy": 8 },
            { "io": "1-4-4", "opcode": "0xEB", "ndummy": 4, "nmode": 2 }
          ],
          "pp": [
            { "io": "1-1-1", "opcode": "0x02" },
            { "io": "1-1-4", "opcode": "0x32" }
          ],
          "qe_type": "sr2-bit1-wr-sr1",
          "otp": { "start_index": 1, "count": 3, "size": 256 },
          "wp": { "preset": "bp3-tb", "block_size": 65536 }
        }
      ]
    }
  ]
}"#;

fn test_db() -> NorDatabase {
    let mut db = NorDatabase::default();
    db.merge_json(DB_JSON).unwrap();
    db
}

fn probe_default(caps: ControllerCaps) -> SpiNor<DummyController<DummyNor>> {
    let ctrl = DummyController::new(DummyNor::new_default()).with_caps(caps);
    let bus = SpiBus::attach(ctrl).unwrap();
    let mut nor = SpiNor::new(bus);
    nor.probe_init(&test_db()).unwrap();
    nor
}

#[test]
fn id_probe_single_io_controller_picks_fast_read() {
    // A single-wire-only bridge: negotiation must land on 1-1-1 FAST_READ
    let nor = probe_default(ControllerCaps::empty());
    let info = nor.info().unwrap();

    assert_eq!(info.model, "W25Q128FV");
    assert_eq!(info.size, 16 << 20);
    assert_eq!(info.page_size, 256);
    assert_eq!(info.read_io, IoType::Io1_1_1);
    assert_eq!(nor.state().read_opcode, 0x0B);
    assert_eq!(nor.state().read_ndummy, 1);
    assert_eq!(info.erasesizes, vec![4096, 32768, 65536]);
}

#[test]
fn quad_controller_upgrades_to_quad_read() {
    let ctrl = DummyController::new(DummyNor::new_default());
    let chip = ctrl.chip();
    let bus = SpiBus::attach(ctrl).unwrap();
    let mut nor = SpiNor::new(bus);
    nor.set_allowed_io_caps(IoCaps::SINGLE | IoCaps::IO_1_1_4);
    nor.probe_init(&test_db()).unwrap();

    assert_eq!(nor.state().read_io, IoType::Io1_1_4);
    assert_eq!(nor.state().read_opcode, 0x6B);
    // The QE bit must have been set for the quad read to work
    assert_ne!(chip.borrow().sr2() & 0x02, 0);

    // Allowed-caps policy is honored (round-trip law)
    assert!(IoCaps::SINGLE
        .union(IoCaps::IO_1_1_4)
        .supports(nor.state().read_io));
}

#[test]
fn sfdp_only_probe_derives_geometry() {
    // Empty database: everything must come from SFDP
    let ctrl = DummyController::new(DummyNor::new_default());
    let bus = SpiBus::attach(ctrl).unwrap();
    let mut nor = SpiNor::new(bus);
    nor.probe_init(&NorDatabase::default()).unwrap();

    let info = nor.info().unwrap();
    assert_eq!(info.size, 16 << 20);
    assert_eq!(info.page_size, 256);
    assert_eq!(info.erasesizes, vec![4096, 32768, 65536]);
    // Fastest flavor both sides support: 1-4-4 (EBh with 2 mode + 4 dummy
    // clocks = 3 dummy bytes on 4 wires)
    assert_eq!(nor.state().read_io, IoType::Io1_4_4);
    assert_eq!(nor.state().read_opcode, 0xEB);
    assert_eq!(nor.state().read_ndummy, 3);
}

#[test]
fn write_read_roundtrip_and_page_chunking() {
    let mut nor = probe_default(ControllerCaps::DUAL | ControllerCaps::QUAD);

    let data: Vec<u8> = (0..1000u32).map(|i| (i * 7) as u8).collect();
    // Deliberately page-misaligned start
    nor.write(0x1234, &data).unwrap();

    let mut back = vec![0u8; data.len()];
    nor.read(0x1234, &mut back).unwrap();
    assert_eq!(back, data);

    // Out-of-range is rejected before touching the wire
    let mut buf = [0u8; 4];
    assert_eq!(
        nor.read((16 << 20) - 2, &mut buf),
        Err(Error::AddressOutOfRange)
    );
}

#[test]
fn erase_plan_covers_chip_and_validates_alignment() {
    let mut nor = probe_default(ControllerCaps::empty());

    // After probe the regions must cover the chip exactly, each with a
    // non-empty erase mask
    let total: u64 = nor.erase_regions().iter().map(|r| r.size).sum();
    assert_eq!(total, 16 << 20);
    assert!(nor.erase_regions().iter().all(|r| r.erasesizes_mask != 0));

    // Program something, erase an aligned range, expect 0xFF back
    let data = vec![0xA5u8; 8192];
    nor.write(0x10000, &data).unwrap();
    nor.erase(0x10000, 0x10000).unwrap();

    let mut back = vec![0u8; 8192];
    nor.read(0x10000, &mut back).unwrap();
    assert!(back.iter().all(|&b| b == 0xFF));

    // Unaligned erase endpoints are rejected
    assert!(matches!(
        nor.erase(0x10001, 0x1000),
        Err(Error::InvalidParameter(_))
    ));
    assert!(matches!(
        nor.erase(0x10000, 0x1001),
        Err(Error::InvalidParameter(_))
    ));

    // erase_at picks the largest aligned flavor that fits
    let erased = nor.erase_at(0x20000, 1 << 20).unwrap();
    assert_eq!(erased, 65536);
    let erased = nor.erase_at(0x31000, 0x1000).unwrap();
    assert_eq!(erased, 4096);
}

#[test]
fn register_write_read_roundtrip() {
    let mut nor = probe_default(ControllerCaps::empty());

    // SR3 is a plain scratch register on the dummy
    nor.write_reg_acc(&uflash_core::nor::regs::SR3_ACC, 0x60, false)
        .unwrap();
    let val = nor.read_reg_acc(&uflash_core::nor::regs::SR3_ACC).unwrap();
    assert_eq!(val, 0x60);

    // Joint SR+CR path
    nor.write_reg_acc(&uflash_core::nor::regs::SRCR_ACC, 0x0200, false)
        .unwrap();
    let val = nor.read_reg_acc(&uflash_core::nor::regs::SRCR_ACC).unwrap();
    assert_eq!(val & 0x0200, 0x0200);
}

#[test]
fn qpi_toggle_enters_and_leaves() {
    const QPI_DB: &str = r#"{
      "vendors": [
        {
          "id": "winbond",
          "name": "Winbond",
          "parts": [
            {
              "model": "W25Q128FV-QPI",
              "ids": [[239, 64, 24]],
              "size": 16777216,
              "erase": [
                { "opcode": "0x20", "size": 4096 },
                { "opcode": "0xD8", "size": 65536 }
              ],
              "read": [
                { "io": "1-1-1", "opcode": "0x0B", "ndummy": 8 },
                { "io": "4-4-4", "opcode": "0x0B", "ndummy": 8 }
              ],
              "pp": [
                { "io": "1-1-1", "opcode": "0x02" },
                { "io": "4-4-4", "opcode": "0x02" }
              ],
              "qe_type": "sr2-bit1-wr-sr1",
              "qpi_en": "qe-op38h",
              "qpi_dis": "op-ffh"
            }
          ]
        }
      ]
    }"#;

    let mut db = NorDatabase::default();
    db.merge_json(QPI_DB).unwrap();

    let ctrl = DummyController::new(DummyNor::new_default());
    let chip = ctrl.chip();
    let bus = SpiBus::attach(ctrl).unwrap();
    let mut nor = SpiNor::new(bus);
    nor.probe_init(&db).unwrap();

    assert!(chip.borrow().in_qpi());
    assert_eq!(nor.state().cmd_buswidth_curr, 4);
    assert_eq!(nor.state().read_io, IoType::Io4_4_4);

    // Data path works at 4-wire command width
    let data = vec![0x3Cu8; 64];
    nor.write(0, &data).unwrap();
    let mut back = vec![0u8; 64];
    nor.read(0, &mut back).unwrap();
    assert_eq!(back, data);

    // Teardown restores single-wire commands
    nor.detach();
    assert!(!chip.borrow().in_qpi());
}

#[test]
fn four_byte_transition_on_32mib_part() {
    let cfg = DummyNorConfig {
        id: vec![0xEF, 0x40, 0x19],
        size: 32 << 20,
        sfdp: Some(build_sfdp_blob(32 << 20, false)),
        ..DummyNorConfig::default()
    };
    let ctrl = DummyController::new(DummyNor::new(cfg));
    let chip = ctrl.chip();
    let log = ctrl.envelope_log();
    let bus = SpiBus::attach(ctrl).unwrap();
    let mut nor = SpiNor::new(bus);

    // SFDP-only probe: DW16 declares WREN+B7h / WREN+E9h
    nor.probe_init(&NorDatabase::default()).unwrap();

    assert_eq!(nor.state().naddr, 4);
    assert!(nor.state().a4b_mode);
    assert!(chip.borrow().in_4byte_mode());

    // The enter sequence must be on the wire: 06h then B7h
    {
        let log = log.borrow();
        let pos = log
            .iter()
            .position(|e| e.out.first() == Some(&0xB7))
            .expect("B7h was never issued");
        assert_eq!(log[pos - 1].out, vec![0x06]);
    }

    // A read beyond 16 MiB carries a 4-byte address on the wire
    let data = vec![0x77u8; 16];
    nor.write(0x0200_0000, &data).unwrap();

    log.borrow_mut().clear();
    let mut back = vec![0u8; 16];
    nor.read(0x0200_0000, &mut back).unwrap();
    assert_eq!(back, data);

    {
        let log = log.borrow();
        let read_env = log
            .iter()
            .find(|e| e.out.first() == Some(&nor.state().read_opcode))
            .expect("no read envelope");
        assert_eq!(&read_env.out[1..5], &[0x02, 0x00, 0x00, 0x00]);
    }

    // Teardown leaves 4-byte mode: 06h then E9h
    log.borrow_mut().clear();
    nor.detach();
    {
        let log = log.borrow();
        let pos = log
            .iter()
            .position(|e| e.out.first() == Some(&0xE9))
            .expect("E9h was never issued");
        assert_eq!(log[pos - 1].out, vec![0x06]);
    }
    assert!(!chip.borrow().in_4byte_mode());
}

#[test]
fn cross_die_read_splits_at_die_boundary() {
    const TWO_DIE_DB: &str = r#"{
      "vendors": [
        {
          "id": "winbond",
          "name": "Winbond",
          "parts": [
            {
              "model": "W25M128-dual",
              "ids": [[239, 113, 24]],
              "size": 16777216,
              "ndies": 2,
              "erase": [{ "opcode": "0xD8", "size": 65536 }]
            }
          ]
        }
      ]
    }"#;

    let mut db = NorDatabase::default();
    db.merge_json(TWO_DIE_DB).unwrap();

    let cfg = DummyNorConfig {
        id: vec![0xEF, 0x71, 0x18],
        size: 16 << 20,
        ndies: 2,
        sfdp: None,
        ..DummyNorConfig::default()
    };
    let ctrl = DummyController::new(DummyNor::new(cfg));
    let log = ctrl.envelope_log();
    let bus = SpiBus::attach(ctrl).unwrap();
    let mut nor = SpiNor::new(bus);
    nor.probe_init(&db).unwrap();

    // Straddle the die boundary at 8 MiB
    let boundary = 8 << 20;
    let data: Vec<u8> = (0..64u32).map(|i| i as u8).collect();
    nor.write(boundary - 32, &data).unwrap();

    log.borrow_mut().clear();
    let mut back = vec![0u8; 64];
    nor.read(boundary - 32, &mut back).unwrap();
    assert_eq!(back, data);

    // A die-select must have been issued between the two halves
    let log = log.borrow();
    assert!(log
        .iter()
        .any(|e| e.out.first() == Some(&0xC2) && e.out.get(1) == Some(&1)));
}

#[test]
fn wp_region_roundtrip() {
    let mut nor = probe_default(ControllerCaps::empty());

    let regions = nor.wp_region_list().unwrap();
    assert!(regions.len() > 10);

    for region in regions.iter().take(6) {
        nor.set_wp_region(region).unwrap();
        let got = nor.get_wp_region().unwrap();
        assert_eq!(&got, region);
    }

    // A range the part does not advertise is rejected
    let bogus = WpRange {
        base: 123,
        size: 456,
    };
    assert!(matches!(
        nor.set_wp_region(&bogus),
        Err(Error::InvalidParameter(_))
    ));
}

#[test]
fn otp_program_erase_lock() {
    let mut nor = probe_default(ControllerCaps::empty());

    let secret = [0xDE, 0xAD, 0xBE, 0xEF];
    nor.otp_write(1, 0, &secret).unwrap();

    let mut back = [0u8; 4];
    nor.otp_read(1, 0, &mut back).unwrap();
    assert_eq!(back, secret);

    nor.otp_erase(1).unwrap();
    nor.otp_read(1, 0, &mut back).unwrap();
    assert_eq!(back, [0xFF; 4]);

    // Lock region 2, then verify writes bounce off
    assert!(!nor.otp_locked(2).unwrap());
    nor.otp_write(2, 0, &secret).unwrap();
    nor.otp_lock(2).unwrap();
    assert!(nor.otp_locked(2).unwrap());

    nor.otp_erase(2).unwrap();
    nor.otp_read(2, 0, &mut back).unwrap();
    assert_eq!(back, secret, "locked region must not erase");

    // Out-of-window index
    assert!(nor.otp_read(7, 0, &mut back).is_err());
}

#[test]
fn uid_read() {
    let mut nor = probe_default(ControllerCaps::empty());
    let uid = nor.read_uid().unwrap();
    assert_eq!(uid.len(), 8);
    assert_eq!(uid[0], 0xD5);
}
