// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Error Injection table (EINJ)
//!
//! The injection actions point at a mailbox shared between the OS and the SMI handler. The
//! mailbox and the trigger action table that follows it live in persistent memory.

use log::debug;
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

use crate::platform::{CbmemId, TableSink};
use crate::sdt::SdtBuffer;
use crate::{
    ACCESS_SIZE_QWORD, ACCESS_SIZE_WORD, ADDRESS_SPACE_IO, GenericAddressStructure, Result,
    SdtHeader, TableKind, fill_header,
};

/// Number of injection actions in the table.
pub const ACTION_COUNT: usize = 9;
/// Error types the SMI handler can inject: processor and memory, correctable and not.
pub const EINJ_DEFAULT_CAP: u64 = 0x0f;
/// APM command port, written to raise the injection SMI.
const APM_CNT: u64 = 0xb2;
const APM_CNT_EINJ: u64 = 0x9a;

// Injection actions.
const BEGIN_INJECT_OP: u8 = 0;
const GET_TRIGGER_ACTION_TABLE: u8 = 1;
const SET_ERROR_TYPE: u8 = 2;
const GET_ERROR_TYPE: u8 = 3;
const END_INJECT_OP: u8 = 4;
const EXECUTE_INJECT_OP: u8 = 5;
const CHECK_BUSY_STATUS: u8 = 6;
const GET_CMD_STATUS: u8 = 7;
const SET_ERROR_TYPE_WITH_ADDRESS: u8 = 8;
const TRIGGER_ERROR: u8 = 0xff;

// Injection instructions.
const READ_REGISTER: u8 = 0;
const READ_REGISTER_VALUE: u8 = 1;
const WRITE_REGISTER: u8 = 2;
const WRITE_REGISTER_VALUE: u8 = 3;
const NO_OP: u8 = 4;

const FLAG_IGNORE: u8 = 0;
const FLAG_PRESERVE: u8 = 1;

/// Parameters of a SET_ERROR_TYPE_WITH_ADDRESS action.
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct SetErrorType {
    pub errtype: U32,
    pub vendorerrortype: U32,
    pub flags: U32,
    pub apicid: U32,
    pub memaddr: U64,
    pub memrange: U64,
    pub pciesbdf: U32,
}

/// Mailbox shared with the SMI handler.
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct EinjSmi {
    pub op_state: U64,
    pub err_inject: [U64; 4],
    pub trigger_action_table: U64,
    pub err_inj_cap: U64,
    pub op_status: U64,
    pub cmd_sts: U64,
    pub einj_addr: U64,
    pub einj_addr_msk: U64,
    pub setaddrtable: SetErrorType,
    reserved: [U64; 50],
}

/// An injection or trigger action.
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct ActionEntry {
    pub action: u8,
    pub instruction: u8,
    pub flags: u8,
    reserved: u8,
    pub register: GenericAddressStructure,
    pub value: U64,
    pub mask: U64,
}

impl ActionEntry {
    fn new(action: u8, instruction: u8, flags: u8, register: GenericAddressStructure) -> Self {
        ActionEntry {
            action,
            instruction,
            flags,
            register,
            ..Default::default()
        }
    }

    fn with_value(mut self, value: u64, mask: u64) -> Self {
        self.value = U64::new(value);
        self.mask = U64::new(mask);
        self
    }
}

/// Header of the trigger action table, followed by its actions.
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct TriggerTableHeader {
    pub header_size: U32,
    pub revision: U32,
    pub table_size: U32,
    pub entry_count: U32,
}

/// Injection header following the table header.
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct InjectionHeader {
    pub einj_header_size: U32,
    pub einj_flags: u8,
    reserved: [u8; 3],
    pub entry_count: U32,
}

#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct Einj {
    pub header: SdtHeader,
    pub inj_header: InjectionHeader,
    pub action_table: [ActionEntry; ACTION_COUNT],
}

#[allow(clippy::cast_possible_truncation)]
pub const EINJ_LEN: u32 = std::mem::size_of::<Einj>() as u32;
const SMI_LEN: usize = std::mem::size_of::<EinjSmi>();
const ACTION_LEN: usize = std::mem::size_of::<ActionEntry>();
const TRIGGER_HEADER_LEN: usize = std::mem::size_of::<TriggerTableHeader>();
#[allow(clippy::cast_possible_truncation)]
const INJECTION_HEADER_LEN: u32 = std::mem::size_of::<InjectionHeader>() as u32;
#[allow(clippy::cast_possible_truncation)]
const ACTION_COUNT_U32: u32 = ACTION_COUNT as u32;

/// Size of the trigger action table: its header and `actions` entries.
fn trigger_table_size(actions: u8) -> u32 {
    // At most 16 + 255 * 32 bytes.
    #[allow(clippy::cast_possible_truncation)]
    let size = (TRIGGER_HEADER_LEN + ACTION_LEN * usize::from(actions)) as u32;
    size
}

/// Size of the persistent area holding the mailbox and a trigger table of `actions` entries.
pub fn einj_region_size(actions: u8) -> u64 {
    utils::usize_to_u64(SMI_LEN + TRIGGER_HEADER_LEN + ACTION_LEN * usize::from(actions))
}

fn memory_register(address: u64) -> GenericAddressStructure {
    GenericAddressStructure::memory_qword(address)
}

/// Address of the mailbox field at byte `offset`.
fn smi_field(addr: u64, offset: usize) -> GenericAddressStructure {
    memory_register(addr + utils::usize_to_u64(offset))
}

/// Image of the persistent area at `addr`: the zeroed mailbox followed by a trigger action table
/// of `actions` no-op entries.
pub fn einj_region(addr: u64, actions: u8) -> Vec<u8> {
    let trigger_table = addr + utils::usize_to_u64(SMI_LEN);
    debug!("acpi: EINJ: mailbox at {addr:#x}, trigger action table at {trigger_table:#x}");

    let mut smi = EinjSmi::new_zeroed();
    smi.err_inj_cap = U64::new(EINJ_DEFAULT_CAP);
    smi.trigger_action_table = U64::new(trigger_table);

    let mut region = smi.as_bytes().to_vec();
    let header = TriggerTableHeader {
        header_size: U32::new(16),
        revision: U32::ZERO,
        table_size: U32::new(trigger_table_size(actions)),
        entry_count: U32::new(u32::from(actions)),
    };
    region.extend_from_slice(header.as_bytes());
    for _ in 0..actions {
        let action = ActionEntry::new(TRIGGER_ERROR, NO_OP, FLAG_IGNORE, memory_register(0))
            .with_value(0, 0xffff_ffff);
        region.extend_from_slice(action.as_bytes());
    }
    region
}

/// The injection actions, operating on the mailbox at `addr`.
pub fn default_actions(addr: u64) -> [ActionEntry; ACTION_COUNT] {
    let op_state = std::mem::offset_of!(EinjSmi, op_state);
    let trigger_action_table = std::mem::offset_of!(EinjSmi, trigger_action_table);
    let err_inject = std::mem::offset_of!(EinjSmi, err_inject);
    let err_inj_cap = std::mem::offset_of!(EinjSmi, err_inj_cap);
    let op_status = std::mem::offset_of!(EinjSmi, op_status);
    let cmd_sts = std::mem::offset_of!(EinjSmi, cmd_sts);
    let setaddrtable = std::mem::offset_of!(EinjSmi, setaddrtable);
    let apm_cnt = GenericAddressStructure::new(ADDRESS_SPACE_IO, 16, 0, ACCESS_SIZE_WORD, APM_CNT);

    [
        ActionEntry::new(
            BEGIN_INJECT_OP,
            WRITE_REGISTER_VALUE,
            FLAG_PRESERVE,
            smi_field(addr, op_state),
        )
        .with_value(0, 0xffff_ffff),
        ActionEntry::new(
            GET_TRIGGER_ACTION_TABLE,
            READ_REGISTER,
            FLAG_IGNORE,
            smi_field(addr, trigger_action_table),
        )
        .with_value(0, u64::MAX),
        ActionEntry::new(
            SET_ERROR_TYPE,
            WRITE_REGISTER,
            FLAG_PRESERVE,
            smi_field(addr, err_inject),
        )
        .with_value(0, 0xffff_ffff),
        ActionEntry::new(
            GET_ERROR_TYPE,
            READ_REGISTER,
            FLAG_IGNORE,
            smi_field(addr, err_inj_cap),
        )
        .with_value(0, 0xffff_ffff),
        ActionEntry::new(
            END_INJECT_OP,
            WRITE_REGISTER_VALUE,
            FLAG_PRESERVE,
            smi_field(addr, op_state),
        )
        .with_value(0, 0xffff_ffff),
        ActionEntry::new(EXECUTE_INJECT_OP, WRITE_REGISTER_VALUE, FLAG_PRESERVE, apm_cnt)
            .with_value(APM_CNT_EINJ, 0xffff),
        ActionEntry::new(
            CHECK_BUSY_STATUS,
            READ_REGISTER_VALUE,
            FLAG_IGNORE,
            smi_field(addr, op_status),
        )
        .with_value(1, 1),
        ActionEntry::new(
            GET_CMD_STATUS,
            READ_REGISTER,
            FLAG_PRESERVE,
            smi_field(addr, cmd_sts),
        )
        .with_value(0, 0x1fe),
        ActionEntry::new(
            SET_ERROR_TYPE_WITH_ADDRESS,
            WRITE_REGISTER,
            FLAG_PRESERVE,
            smi_field(addr, setaddrtable),
        )
        .with_value(1, 0xffff_ffff),
    ]
}

/// Build the EINJ for the mailbox at `addr`.
pub fn create_einj(table: &mut SdtBuffer, addr: u64) -> Result<()> {
    fill_header(Some(&mut *table), TableKind::Einj, EINJ_LEN)?;
    let actions = default_actions(addr);
    for (index, action) in actions.iter().enumerate() {
        let register = action.register;
        debug!("acpi: EINJ: action {index} register at {:#x}", register.address.get());
    }
    let einj = Einj {
        header: table.header(),
        inj_header: InjectionHeader {
            einj_header_size: U32::new(INJECTION_HEADER_LEN),
            einj_flags: 0,
            reserved: [0; 3],
            entry_count: U32::new(ACTION_COUNT_U32),
        },
        action_table: actions,
    };
    table.write_at(0, &einj);
    Ok(())
}

/// Set up the mailbox and trigger table in persistent memory, then build the EINJ and add it to
/// the tables. Returns the address of the table.
pub fn write_einj(sink: &mut dyn TableSink, actions: u8) -> Result<u64> {
    let area = sink.add_persistent(CbmemId::ACPI_EINJ, einj_region_size(actions))?;
    sink.write_bytes(area.address, &einj_region(area.address, actions))?;

    debug!("acpi:    * EINJ");
    let mut table = SdtBuffer::new(EINJ_LEN as usize);
    create_einj(&mut table, area.address)?;
    sink.add_table(&mut table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tpm::tests::MemorySink;

    #[test]
    fn test_layout() {
        assert_eq!(ACTION_LEN, 32);
        assert_eq!(std::mem::size_of::<InjectionHeader>(), 12);
        assert_eq!(EINJ_LEN, 36 + 12 + 9 * 32);
        assert_eq!(std::mem::offset_of!(EinjSmi, trigger_action_table), 40);
        assert_eq!(std::mem::offset_of!(EinjSmi, setaddrtable), 88);
    }

    #[test]
    fn test_region() {
        let region = einj_region(0x7000_0000, 2);
        assert_eq!(utils::usize_to_u64(region.len()), einj_region_size(2));

        let smi = EinjSmi::read_from_prefix(&region).unwrap().0;
        assert_eq!(smi.err_inj_cap.get(), EINJ_DEFAULT_CAP);
        assert_eq!(
            smi.trigger_action_table.get(),
            0x7000_0000 + utils::usize_to_u64(SMI_LEN)
        );

        let header = TriggerTableHeader::read_from_prefix(&region[SMI_LEN..]).unwrap().0;
        assert_eq!(header.header_size.get(), 16);
        assert_eq!(header.table_size.get(), 16 + 2 * 32);
        assert_eq!(header.entry_count.get(), 2);

        let action =
            ActionEntry::read_from_prefix(&region[SMI_LEN + TRIGGER_HEADER_LEN..]).unwrap().0;
        assert_eq!((action.action, action.instruction), (TRIGGER_ERROR, NO_OP));
        assert_eq!(action.mask.get(), 0xffff_ffff);
    }

    #[test]
    fn test_einj() {
        let mut table = SdtBuffer::new(EINJ_LEN as usize);
        create_einj(&mut table, 0x7000_0000).unwrap();

        let einj = table.read_at::<Einj>(0).unwrap();
        assert_eq!(einj.header.signature, *b"EINJ");
        assert_eq!(einj.header.length.get(), EINJ_LEN);
        assert_eq!(einj.inj_header.einj_header_size.get(), 12);
        assert_eq!(einj.inj_header.entry_count.get(), 9);

        let actions = einj.action_table;
        let begin = actions[0].register;
        assert_eq!(begin.address.get(), 0x7000_0000);
        let trigger = actions[1].register;
        assert_eq!(trigger.address.get(), 0x7000_0028);
        let execute = actions[5];
        let register = execute.register;
        assert_eq!(register.address_space_id, ADDRESS_SPACE_IO);
        assert_eq!(register.address.get(), 0xb2);
        assert_eq!(execute.value.get(), 0x9a);
        let check_busy = actions[6];
        assert_eq!((check_busy.value.get(), check_busy.mask.get()), (1, 1));
        let with_address = actions[8].register;
        assert_eq!(with_address.access_size, ACCESS_SIZE_QWORD);
    }

    #[test]
    fn test_write_einj() {
        let mut sink = MemorySink::default();
        write_einj(&mut sink, 1).unwrap();
        let area = sink.areas[&CbmemId::ACPI_EINJ];
        assert_eq!(area.address, 0x7f00_0000);
        assert_eq!(area.size, einj_region_size(1));
    }
}
