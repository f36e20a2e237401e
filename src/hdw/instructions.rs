/*

    Instruction execution for the primary and CB-prefixed opcode tables.

    The encoding is regular enough that most of the table collapses onto the
    operand index scheme B,C,D,E,H,L,(HL),A (0-7): the LD block at 0x40-0x7F,
    the accumulator ALU block at 0x80-0xBF and the whole CB table route
    through read_r8/write_r8. Everything else is spelled out per opcode.

    Every arm returns the master clocks consumed (always a multiple of 4);
    conditional jumps, calls and returns charge their taken/not-taken costs.

*/

use crate::hdw::cpu::Cpu;
use crate::hdw::cpu_ops::*;
use crate::hdw::stack::{stack_pop16, stack_push16};

// Operand index order used by the LD/ALU/CB blocks.
fn read_r8(cpu: &mut Cpu, index: u8) -> u8 {
    match index {
        0 => cpu.registers.b,
        1 => cpu.registers.c,
        2 => cpu.registers.d,
        3 => cpu.registers.e,
        4 => cpu.registers.h,
        5 => cpu.registers.l,
        6 => cpu.bus.read_byte(cpu.registers.get_hl()),
        _ => cpu.registers.a,
    }
}

fn write_r8(cpu: &mut Cpu, index: u8, value: u8) {
    match index {
        0 => cpu.registers.b = value,
        1 => cpu.registers.c = value,
        2 => cpu.registers.d = value,
        3 => cpu.registers.e = value,
        4 => cpu.registers.h = value,
        5 => cpu.registers.l = value,
        6 => cpu.bus.write_byte(cpu.registers.get_hl(), value),
        _ => cpu.registers.a = value,
    }
}

// Register pair order BC,DE,HL,SP used by the 16-bit arithmetic and loads.
fn read_rr(cpu: &Cpu, index: u8) -> u16 {
    match index {
        0 => cpu.registers.get_bc(),
        1 => cpu.registers.get_de(),
        2 => cpu.registers.get_hl(),
        _ => cpu.sp,
    }
}

fn write_rr(cpu: &mut Cpu, index: u8, value: u16) {
    match index {
        0 => cpu.registers.set_bc(value),
        1 => cpu.registers.set_de(value),
        2 => cpu.registers.set_hl(value),
        _ => cpu.sp = value,
    }
}

// Condition order NZ,Z,NC,C used by JR/JP/CALL/RET.
fn condition(cpu: &Cpu, index: u8) -> bool {
    match index {
        0 => !cpu.registers.f.zero,
        1 => cpu.registers.f.zero,
        2 => !cpu.registers.f.carry,
        _ => cpu.registers.f.carry,
    }
}

pub fn execute(cpu: &mut Cpu, opcode: u8) -> u32 {
    match opcode {
        0x00 => 4, // NOP

        // LD rr,d16
        0x01 | 0x11 | 0x21 | 0x31 => {
            let value = cpu.fetch_word();
            write_rr(cpu, opcode >> 4, value);
            12
        }

        // LD (BC)/(DE),A and the HL+/HL- stores
        0x02 => {
            cpu.bus.write_byte(cpu.registers.get_bc(), cpu.registers.a);
            8
        }
        0x12 => {
            cpu.bus.write_byte(cpu.registers.get_de(), cpu.registers.a);
            8
        }
        0x22 => {
            let hl = cpu.registers.get_hl();
            cpu.bus.write_byte(hl, cpu.registers.a);
            cpu.registers.set_hl(hl.wrapping_add(1));
            8
        }
        0x32 => {
            let hl = cpu.registers.get_hl();
            cpu.bus.write_byte(hl, cpu.registers.a);
            cpu.registers.set_hl(hl.wrapping_sub(1));
            8
        }

        // INC/DEC rr
        0x03 | 0x13 | 0x23 | 0x33 => {
            let index = opcode >> 4;
            let value = read_rr(cpu, index).wrapping_add(1);
            write_rr(cpu, index, value);
            8
        }
        0x0B | 0x1B | 0x2B | 0x3B => {
            let index = opcode >> 4;
            let value = read_rr(cpu, index).wrapping_sub(1);
            write_rr(cpu, index, value);
            8
        }

        // INC/DEC r
        0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x34 | 0x3C => {
            let index = opcode >> 3;
            let value = read_r8(cpu, index);
            let result = op_inc8(cpu, value);
            write_r8(cpu, index, result);
            if index == 6 { 12 } else { 4 }
        }
        0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x35 | 0x3D => {
            let index = opcode >> 3;
            let value = read_r8(cpu, index);
            let result = op_dec8(cpu, value);
            write_r8(cpu, index, result);
            if index == 6 { 12 } else { 4 }
        }

        // LD r,d8
        0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x36 | 0x3E => {
            let index = opcode >> 3;
            let value = cpu.fetch_byte();
            write_r8(cpu, index, value);
            if index == 6 { 12 } else { 8 }
        }

        // Accumulator rotates: like their CB forms but Z is always cleared.
        0x07 => {
            let a = cpu.registers.a;
            cpu.registers.a = op_rlc(cpu, a);
            cpu.registers.f.zero = false;
            4
        }
        0x0F => {
            let a = cpu.registers.a;
            cpu.registers.a = op_rrc(cpu, a);
            cpu.registers.f.zero = false;
            4
        }
        0x17 => {
            let a = cpu.registers.a;
            cpu.registers.a = op_rl(cpu, a);
            cpu.registers.f.zero = false;
            4
        }
        0x1F => {
            let a = cpu.registers.a;
            cpu.registers.a = op_rr(cpu, a);
            cpu.registers.f.zero = false;
            4
        }

        // LD (a16),SP
        0x08 => {
            let address = cpu.fetch_word();
            cpu.bus.write_byte(address, (cpu.sp & 0xFF) as u8);
            cpu.bus.write_byte(address.wrapping_add(1), (cpu.sp >> 8) as u8);
            20
        }

        // ADD HL,rr
        0x09 | 0x19 | 0x29 | 0x39 => {
            let value = read_rr(cpu, opcode >> 4);
            op_add_hl(cpu, value);
            8
        }

        // LD A,(BC)/(DE) and the HL+/HL- loads
        0x0A => {
            cpu.registers.a = cpu.bus.read_byte(cpu.registers.get_bc());
            8
        }
        0x1A => {
            cpu.registers.a = cpu.bus.read_byte(cpu.registers.get_de());
            8
        }
        0x2A => {
            let hl = cpu.registers.get_hl();
            cpu.registers.a = cpu.bus.read_byte(hl);
            cpu.registers.set_hl(hl.wrapping_add(1));
            8
        }
        0x3A => {
            let hl = cpu.registers.get_hl();
            cpu.registers.a = cpu.bus.read_byte(hl);
            cpu.registers.set_hl(hl.wrapping_sub(1));
            8
        }

        // STOP: low-power idle until a button press. The encoding carries a
        // padding byte.
        0x10 => {
            cpu.fetch_byte();
            cpu.is_stopped = true;
            4
        }

        // JR r8 and JR cc,r8
        0x18 => {
            let offset = cpu.fetch_byte() as i8;
            cpu.pc = cpu.pc.wrapping_add(offset as u16);
            12
        }
        0x20 | 0x28 | 0x30 | 0x38 => {
            let offset = cpu.fetch_byte() as i8;
            if condition(cpu, (opcode >> 3) & 0x03) {
                cpu.pc = cpu.pc.wrapping_add(offset as u16);
                12
            } else {
                8
            }
        }

        0x27 => {
            op_daa(cpu);
            4
        }
        0x2F => {
            // CPL
            cpu.registers.a = !cpu.registers.a;
            cpu.registers.f.subtract = true;
            cpu.registers.f.half_carry = true;
            4
        }
        0x37 => {
            // SCF
            cpu.registers.f.subtract = false;
            cpu.registers.f.half_carry = false;
            cpu.registers.f.carry = true;
            4
        }
        0x3F => {
            // CCF
            cpu.registers.f.subtract = false;
            cpu.registers.f.half_carry = false;
            cpu.registers.f.carry = !cpu.registers.f.carry;
            4
        }

        // HALT sits in the middle of the LD block.
        0x76 => {
            cpu.is_halted = true;
            4
        }

        // LD r,r'
        0x40..=0x7F => {
            let dst = (opcode >> 3) & 0x07;
            let src = opcode & 0x07;
            let value = read_r8(cpu, src);
            write_r8(cpu, dst, value);
            if dst == 6 || src == 6 { 8 } else { 4 }
        }

        // Accumulator ALU block
        0x80..=0xBF => {
            let value = read_r8(cpu, opcode & 0x07);
            apply_alu(cpu, (opcode >> 3) & 0x07, value);
            if opcode & 0x07 == 6 { 8 } else { 4 }
        }

        // RET cc / RET / RETI
        0xC0 | 0xC8 | 0xD0 | 0xD8 => {
            if condition(cpu, (opcode >> 3) & 0x03) {
                cpu.pc = stack_pop16(cpu);
                20
            } else {
                8
            }
        }
        0xC9 => {
            cpu.pc = stack_pop16(cpu);
            16
        }
        0xD9 => {
            // RETI enables interrupts immediately, unlike EI.
            cpu.pc = stack_pop16(cpu);
            cpu.bus.interrupt_controller.set_master_enabled(true);
            16
        }

        // POP rr (POP AF routes through the flags register, zeroing the
        // low nibble)
        0xC1 => {
            let value = stack_pop16(cpu);
            cpu.registers.set_bc(value);
            12
        }
        0xD1 => {
            let value = stack_pop16(cpu);
            cpu.registers.set_de(value);
            12
        }
        0xE1 => {
            let value = stack_pop16(cpu);
            cpu.registers.set_hl(value);
            12
        }
        0xF1 => {
            let value = stack_pop16(cpu);
            cpu.registers.set_af(value);
            12
        }

        // JP cc,a16 / JP a16 / JP HL
        0xC2 | 0xCA | 0xD2 | 0xDA => {
            let target = cpu.fetch_word();
            if condition(cpu, (opcode >> 3) & 0x03) {
                cpu.pc = target;
                16
            } else {
                12
            }
        }
        0xC3 => {
            cpu.pc = cpu.fetch_word();
            16
        }
        0xE9 => {
            cpu.pc = cpu.registers.get_hl();
            4
        }

        // CALL cc,a16 / CALL a16
        0xC4 | 0xCC | 0xD4 | 0xDC => {
            let target = cpu.fetch_word();
            if condition(cpu, (opcode >> 3) & 0x03) {
                let return_pc = cpu.pc;
                stack_push16(cpu, return_pc);
                cpu.pc = target;
                24
            } else {
                12
            }
        }
        0xCD => {
            let target = cpu.fetch_word();
            let return_pc = cpu.pc;
            stack_push16(cpu, return_pc);
            cpu.pc = target;
            24
        }

        // PUSH rr
        0xC5 => {
            let value = cpu.registers.get_bc();
            stack_push16(cpu, value);
            16
        }
        0xD5 => {
            let value = cpu.registers.get_de();
            stack_push16(cpu, value);
            16
        }
        0xE5 => {
            let value = cpu.registers.get_hl();
            stack_push16(cpu, value);
            16
        }
        0xF5 => {
            let value = cpu.registers.get_af();
            stack_push16(cpu, value);
            16
        }

        // ALU with immediate operand
        0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
            let value = cpu.fetch_byte();
            apply_alu(cpu, (opcode >> 3) & 0x07, value);
            8
        }

        // RST: call into the fixed vector encoded in the opcode.
        0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
            let return_pc = cpu.pc;
            stack_push16(cpu, return_pc);
            cpu.pc = (opcode & 0x38) as u16;
            16
        }

        // CB prefix
        0xCB => {
            let cb_opcode = cpu.fetch_byte();
            execute_cb(cpu, cb_opcode)
        }

        // High-page loads
        0xE0 => {
            let offset = cpu.fetch_byte() as u16;
            cpu.bus.write_byte(0xFF00 | offset, cpu.registers.a);
            12
        }
        0xF0 => {
            let offset = cpu.fetch_byte() as u16;
            cpu.registers.a = cpu.bus.read_byte(0xFF00 | offset);
            12
        }
        0xE2 => {
            cpu.bus
                .write_byte(0xFF00 | cpu.registers.c as u16, cpu.registers.a);
            8
        }
        0xF2 => {
            cpu.registers.a = cpu.bus.read_byte(0xFF00 | cpu.registers.c as u16);
            8
        }

        // Absolute loads
        0xEA => {
            let address = cpu.fetch_word();
            cpu.bus.write_byte(address, cpu.registers.a);
            16
        }
        0xFA => {
            let address = cpu.fetch_word();
            cpu.registers.a = cpu.bus.read_byte(address);
            16
        }

        // Stack pointer arithmetic
        0xE8 => {
            let offset = cpu.fetch_byte() as i8;
            cpu.sp = op_add_sp_e8(cpu, offset);
            16
        }
        0xF8 => {
            let offset = cpu.fetch_byte() as i8;
            let result = op_add_sp_e8(cpu, offset);
            cpu.registers.set_hl(result);
            12
        }
        0xF9 => {
            cpu.sp = cpu.registers.get_hl();
            8
        }

        // Interrupt master enable. DI is immediate; EI lands after the next
        // instruction.
        0xF3 => {
            cpu.bus.interrupt_controller.set_master_enabled(false);
            cpu.bus.interrupt_controller.set_enabling_ime(false);
            4
        }
        0xFB => {
            cpu.bus.interrupt_controller.set_enabling_ime(true);
            4
        }

        // Holes in the opcode map are fatal.
        0xD3 | 0xDB | 0xDD | 0xE3 | 0xE4 | 0xEB | 0xEC | 0xED | 0xF4 | 0xFC | 0xFD => {
            cpu.fatal_opcode(opcode);
            4
        }
    }
}

fn apply_alu(cpu: &mut Cpu, operation: u8, value: u8) {
    match operation {
        0 => op_add(cpu, value, false),
        1 => op_add(cpu, value, true),
        2 => op_sub(cpu, value, false),
        3 => op_sub(cpu, value, true),
        4 => op_and(cpu, value),
        5 => op_xor(cpu, value),
        6 => op_or(cpu, value),
        _ => op_cp(cpu, value),
    }
}

// CB table: rotates/shifts in 0x00-0x3F, then BIT/RES/SET with the bit
// number in bits 5-3. Returned clocks include the prefix fetch.
fn execute_cb(cpu: &mut Cpu, opcode: u8) -> u32 {
    let index = opcode & 0x07;
    let value = read_r8(cpu, index);

    match opcode >> 6 {
        0 => {
            let result = match (opcode >> 3) & 0x07 {
                0 => op_rlc(cpu, value),
                1 => op_rrc(cpu, value),
                2 => op_rl(cpu, value),
                3 => op_rr(cpu, value),
                4 => op_sla(cpu, value),
                5 => op_sra(cpu, value),
                6 => op_swap(cpu, value),
                _ => op_srl(cpu, value),
            };
            write_r8(cpu, index, result);
            if index == 6 { 16 } else { 8 }
        }
        1 => {
            op_bit(cpu, (opcode >> 3) & 0x07, value);
            if index == 6 { 12 } else { 8 }
        }
        2 => {
            let result = value & !(1 << ((opcode >> 3) & 0x07));
            write_r8(cpu, index, result);
            if index == 6 { 16 } else { 8 }
        }
        _ => {
            let result = value | 1 << ((opcode >> 3) & 0x07);
            write_r8(cpu, index, result);
            if index == 6 { 16 } else { 8 }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::hdw::cpu::tests::cpu_with_code;

    // Documented instruction lengths: PC advance for every straight-line
    // encoding (jumps, calls, returns and RST excluded).
    #[test]
    fn pc_advances_by_documented_length() {
        // (opcode, extra bytes, expected length)
        let cases: &[(u8, &[u8], u16)] = &[
            (0x00, &[], 1),
            (0x01, &[0x34, 0x12], 3),
            (0x04, &[], 1),
            (0x06, &[0x7F], 2),
            (0x08, &[0x00, 0xC0], 3),
            (0x0F, &[], 1),
            (0x22, &[], 1),
            (0x2F, &[], 1),
            (0x36, &[0x11], 2),
            (0x3E, &[0x55], 2),
            (0x47, &[], 1),
            (0x86, &[], 1),
            (0xC6, &[0x01], 2),
            (0xCB, &[0x11], 2),
            (0xE0, &[0x80], 2),
            (0xE6, &[0x0F], 2),
            (0xEA, &[0x00, 0xC0], 3),
            (0xF0, &[0x80], 2),
            (0xF8, &[0x02], 2),
            (0xFE, &[0x01], 2),
        ];

        for &(opcode, extra, length) in cases {
            let mut code = vec![opcode];
            code.extend_from_slice(extra);
            let mut cpu = cpu_with_code(&code);
            cpu.registers.set_hl(0xC800);
            cpu.step();
            assert_eq!(
                cpu.pc,
                0x0100 + length,
                "wrong length for opcode {:#04X}",
                opcode
            );
        }
    }

    #[test]
    fn ld_hl_indirect_forms() {
        // LD (HL),d8 ; LD A,(HL+) ; LD A,(HL-)
        let mut cpu = cpu_with_code(&[0x36, 0x7E, 0x2A, 0x3A]);
        cpu.registers.set_hl(0xC123);

        assert_eq!(cpu.step(), 12);
        assert_eq!(cpu.bus.read_byte(0xC123), 0x7E);

        assert_eq!(cpu.step(), 8);
        assert_eq!(cpu.registers.a, 0x7E);
        assert_eq!(cpu.registers.get_hl(), 0xC124);

        cpu.step();
        assert_eq!(cpu.registers.get_hl(), 0xC123);
    }

    #[test]
    fn alu_block_operand_routing() {
        // SUB B with a borrow in every nibble.
        let mut cpu = cpu_with_code(&[0x90]);
        cpu.registers.a = 0x10;
        cpu.registers.b = 0x21;
        cpu.step();
        assert_eq!(cpu.registers.a, 0xEF);
        assert!(cpu.registers.f.subtract);
        assert!(cpu.registers.f.carry);
        assert!(cpu.registers.f.half_carry);
    }

    #[test]
    fn adc_uses_carry_in() {
        let mut cpu = cpu_with_code(&[0xCE, 0x00]); // ADC A,0x00
        cpu.registers.a = 0xFF;
        cpu.registers.f.carry = true;
        cpu.step();
        assert_eq!(cpu.registers.a, 0x00);
        assert!(cpu.registers.f.zero);
        assert!(cpu.registers.f.carry);
        assert!(cpu.registers.f.half_carry);
    }

    #[test]
    fn cb_rotates_through_memory_operand() {
        let mut cpu = cpu_with_code(&[0xCB, 0x06]); // RLC (HL)
        cpu.registers.set_hl(0xC000);
        cpu.bus.write_byte(0xC000, 0x81);

        assert_eq!(cpu.step(), 16);
        assert_eq!(cpu.bus.read_byte(0xC000), 0x03);
        assert!(cpu.registers.f.carry);
    }

    #[test]
    fn cb_set_res() {
        let mut cpu = cpu_with_code(&[0xCB, 0xC7, 0xCB, 0x87]); // SET 0,A ; RES 0,A
        cpu.registers.a = 0x00;
        cpu.step();
        assert_eq!(cpu.registers.a, 0x01);
        cpu.step();
        assert_eq!(cpu.registers.a, 0x00);
    }

    #[test]
    fn swap_nibbles() {
        let mut cpu = cpu_with_code(&[0xCB, 0x37]); // SWAP A
        cpu.registers.a = 0xF1;
        cpu.step();
        assert_eq!(cpu.registers.a, 0x1F);
        assert!(!cpu.registers.f.carry);
    }

    #[test]
    fn jp_hl_is_four_clocks() {
        let mut cpu = cpu_with_code(&[0xE9]);
        cpu.registers.set_hl(0x0200);
        assert_eq!(cpu.step(), 4);
        assert_eq!(cpu.pc, 0x0200);
    }

    #[test]
    fn rst_vectors() {
        let mut cpu = cpu_with_code(&[0xEF]); // RST 28h
        cpu.step();
        assert_eq!(cpu.pc, 0x0028);
        // Return address on the stack.
        assert_eq!(cpu.bus.read_byte(cpu.sp), 0x01);
        assert_eq!(cpu.bus.read_byte(cpu.sp.wrapping_add(1)), 0x01);
    }

    #[test]
    fn add_sp_e8_flags_from_low_byte() {
        let mut cpu = cpu_with_code(&[0xE8, 0xFF]); // ADD SP,-1
        cpu.sp = 0x0000;
        assert_eq!(cpu.step(), 16);
        assert_eq!(cpu.sp, 0xFFFF);
        // Low-byte add 0x00 + 0xFF carries nothing.
        assert!(!cpu.registers.f.carry);
        assert!(!cpu.registers.f.half_carry);
        assert!(!cpu.registers.f.zero);
    }

    #[test]
    fn ld_hl_sp_plus_offset() {
        let mut cpu = cpu_with_code(&[0xF8, 0x05]); // LD HL,SP+5
        cpu.sp = 0xFFFA;
        assert_eq!(cpu.step(), 12);
        assert_eq!(cpu.registers.get_hl(), 0xFFFF);
        assert_eq!(cpu.sp, 0xFFFA);
    }

    #[test]
    fn scf_ccf() {
        let mut cpu = cpu_with_code(&[0x37, 0x3F]);
        cpu.registers.f.carry = false;
        cpu.step();
        assert!(cpu.registers.f.carry);
        cpu.step();
        assert!(!cpu.registers.f.carry);
    }

    #[test]
    fn reti_restores_ime_immediately() {
        let mut cpu = cpu_with_code(&[0xD9]);
        cpu.sp = 0xC000;
        cpu.bus.write_byte(0xC000, 0x00);
        cpu.bus.write_byte(0xC001, 0x02);
        cpu.step();
        assert_eq!(cpu.pc, 0x0200);
        assert!(cpu.bus.interrupt_controller.is_master_enabled());
    }

    #[test]
    fn ld_a16_sp_stores_little_endian() {
        let mut cpu = cpu_with_code(&[0x08, 0x00, 0xC0]); // LD (0xC000),SP
        cpu.sp = 0xBEEF;
        assert_eq!(cpu.step(), 20);
        assert_eq!(cpu.bus.read_byte(0xC000), 0xEF);
        assert_eq!(cpu.bus.read_byte(0xC001), 0xBE);
    }
}
