/*
    Copyright (C) 2026  mdrived contributors

    This file is part of mdrived, a Sinclair Microdrive emulator daemon.

    For the full copyright notice, see the lib.rs file of the
    mdrived-formats crate.
*/
//! Launcher placement for packed snapshots.
//!
//! A packed cartridge carries a small Z80 routine that decompresses the
//! memory image back into place and restores the CPU state by rewriting the
//! immediate operands of its own code. Two strategies exist:
//!
//! * the *screen* launcher keeps everything in the screen area: simple, but
//!   briefly corrupts the top of the screen;
//! * the *hidden* launcher splits into three pieces: a stub in the printer
//!   buffer, a larger routine in a run of identical bytes ("the gap"), and
//!   a final routine ending exactly at the saved stack pointer.
//!
//! The byte arrays below are the routines; the `*_JP`, `*_SRC` etc.
//! constants index the immediate operands that get patched. Tests verify
//! each offset against the opcode preceding it.
use log::debug;

use crate::z80::reader::SliceReader;
use crate::{Error, Result};

/// Printer buffer stub: `di`, then the stream decoder, then a jump into the
/// in-gap routine. Entry point is offset 2; the first two bytes are spare.
pub const LAUNCH_PRT: [u8; 58] = [
    0x00, 0x00, //                    spare
    0xf3, //                          di
    0x21, 0x00, 0x00, //              ld hl, <compressed>      PRT_SRC
    0x11, 0x3a, 0x5b, //              ld de, 23354
    // decoder loop
    0x7e, 0x23, //                    ld a,(hl); inc hl
    0xfe, 0x80, //                    cp 0x80
    0x30, 0x08, //                    jr nc, match
    0x4f, 0x06, 0x00, 0x03, //        ld c,a; ld b,0; inc bc
    0xed, 0xb0, //                    ldir
    0x18, 0x14, //                    jr check
    // match: fetch offset, copy backwards reference
    0x4e, 0x23, 0x46, 0x23, //        ld c,(hl); inc hl; ld b,(hl); inc hl
    0xe5, //                          push hl
    0x62, 0x6b, //                    ld h,d; ld l,e
    0xb7, 0xed, 0x42, //              or a; sbc hl,bc
    0xe6, 0x7f, 0xc6, 0x03, //        and 0x7f; add a,3
    0x4f, 0x06, 0x00, //              ld c,a; ld b,0
    0xed, 0xb0, //                    ldir
    0xe1, //                          pop hl
    // check: done when the write pointer reaches the end address
    0x7a, //                          ld a,d
    0xfe, 0x00, //                    cp <end hi>              PRT_END_HI
    0x38, 0xd9, //                    jr c, loop
    0x20, 0x05, //                    jr nz, done
    0x7b, //                          ld a,e
    0xfe, 0x00, //                    cp <end lo>              PRT_END_LO
    0x38, 0xd2, //                    jr c, loop
    0xc3, 0x00, 0x00, //              jp <in-gap>              PRT_JP
];
pub const PRT_SRC: usize = 4;
pub const PRT_END_HI: usize = 45;
pub const PRT_END_LO: usize = 52;
pub const PRT_JP: usize = 56;

/// Screen launcher: decoder, delta copy, register restore, all in one
/// block that the BASIC loader copies to 16384.
pub const LAUNCH_SCR: [u8; 94] = [
    0xf3, //                          di
    0x21, 0x00, 0x00, //              ld hl, <compressed>      SCR_SRC
    0x11, 0x00, 0x5b, //              ld de, 23296
    // decoder loop (same shape as the printer buffer stub)
    0x7e, 0x23, 0xfe, 0x80, 0x30, 0x08, //
    0x4f, 0x06, 0x00, 0x03, 0xed, 0xb0, 0x18, 0x14, //
    0x4e, 0x23, 0x46, 0x23, 0xe5, 0x62, 0x6b, 0xb7, 0xed, 0x42, //
    0xe6, 0x7f, 0xc6, 0x03, 0x4f, 0x06, 0x00, 0xed, 0xb0, 0xe1, //
    0x7a, 0xfe, 0x00, //              cp <end hi>              SCR_END_HI
    0x38, 0xd9, 0x20, 0x05, //
    0x7b, 0xfe, 0x00, //              cp <end lo>              SCR_END_LO
    0x38, 0xd2, //
    // move the reserved trailing bytes to the top of memory; DE already
    // points at 65536-delta when the decoder falls through
    0x21, 0x00, 0x00, //              ld hl, <delta store>     SCR_LCF
    0x01, 0x00, 0x00, //              ld bc, <delta>           SCR_LCS
    0xed, 0xb0, //                    ldir
    // restore machine state
    0x01, 0xfd, 0x7f, //              ld bc, 0x7ffd
    0x3e, 0x00, //                    ld a, <port>             SCR_OUT
    0xed, 0x79, //                    out (c),a
    0x11, 0x00, 0x00, //              ld de, <DE>              SCR_DE
    0x01, 0x00, 0x00, //              ld bc, <BC>              SCR_BC
    0x21, 0x00, 0x00, //              ld hl, <HL>              SCR_HL
    0x3e, 0x00, //                    ld a, <R>                SCR_R
    0xed, 0x4f, //                    ld r,a
    0x31, 0x5c, 0x40, //              ld sp, 16476 (AF data below)
    0xf1, //                          pop af
    0x31, 0x00, 0x00, //              ld sp, <SP>              SCR_SP
    0xfb, //                          ei                       SCR_EI
    0xc3, 0x00, 0x00, //              jp <PC>                  SCR_JP
    0x00, 0x00, //                    F, A                     SCR_AF
];
pub const SCR_SRC: usize = 2;
pub const SCR_END_HI: usize = 43;
pub const SCR_END_LO: usize = 50;
pub const SCR_LCF: usize = 54;
pub const SCR_LCS: usize = 57;
pub const SCR_OUT: usize = 65;
pub const SCR_DE: usize = 69;
pub const SCR_BC: usize = 72;
pub const SCR_HL: usize = 75;
pub const SCR_R: usize = 78;
pub const SCR_SP: usize = 86;
pub const SCR_EI: usize = 88;
pub const SCR_JP: usize = 90;
pub const SCR_AF: usize = 92;
/// End of the screen launcher code; the delta bytes are stored after it.
pub const SCR_DELTA: usize = 94;

/// In-gap routine: moves the delta bytes to the top of memory, restores the
/// printer buffer, points SP at the under-stack data and jumps on. The
/// saved delta bytes and the printer buffer copy live at [IGP_BEGIN].
pub const LAUNCH_IGP: [u8; 83] = [
    0x21, 0x00, 0x00, //              ld hl, <bdata>           IGP_BDATA
    0x11, 0x00, 0x00, //              ld de, <65536-delta>     IGP_DST
    0x01, 0x00, 0x00, //              ld bc, <delta>           IGP_LCS
    0xed, 0xb0, //                    ldir
    0x11, 0x00, 0x5b, //              ld de, 23296
    0x01, 0x3a, 0x00, //              ld bc, 58
    0xed, 0xb0, //                    ldir
    0x31, 0x00, 0x00, //              ld sp, <stack data>      IGP_RD
    0xc3, 0x00, 0x00, //              jp <stack code>          IGP_JP
    // bdata: delta bytes, then the original printer buffer content
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, //
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, //
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, //
];
pub const IGP_BDATA: usize = 1;
pub const IGP_DST: usize = 4;
pub const IGP_LCS: usize = 7;
pub const IGP_RD: usize = 20;
pub const IGP_JP: usize = 23;
pub const IGP_BEGIN: usize = 25;

/// Under-stack routine: erases the gap, restores the banked port, DE, BC,
/// HL and R, pops AF and returns into the program. The data section ends
/// exactly at the saved stack pointer, so the final RETN leaves SP correct.
pub const LAUNCH_STK: [u8; 41] = [
    0x21, 0x00, 0x00, //              ld hl, <gap start>       STK_GAP
    0x36, 0x00, //                    ld (hl), <fill>          STK_CHR
    0x54, 0x5d, 0x13, //              ld d,h; ld e,l; inc de
    0x01, 0x00, 0x00, //              ld bc, <size-1>          STK_CLR
    0xed, 0xb0, //                    ldir
    0x01, 0xfd, 0x7f, //              ld bc, 0x7ffd
    0x3e, 0x00, //                    ld a, <port>             STK_OUT
    0xed, 0x79, //                    out (c),a
    0x11, 0x00, 0x00, //              ld de, <DE>              STK_DE
    0x01, 0x00, 0x00, //              ld bc, <BC>              STK_BC
    0x21, 0x00, 0x00, //              ld hl, <HL>              STK_HL
    0x3e, 0x00, //                    ld a, <R>                STK_R
    0xed, 0x4f, //                    ld r,a
    0xf1, //                          pop af
    0xfb, //                          ei                       STK_EI
    0xed, 0x45, //                    retn
    0x00, 0x00, //                    F, A                     STK_AF
    0x00, 0x00, //                    PC                       STK_JP
];
pub const STK_GAP: usize = 1;
pub const STK_CHR: usize = 4;
pub const STK_CLR: usize = 9;
pub const STK_OUT: usize = 17;
pub const STK_DE: usize = 21;
pub const STK_BC: usize = 24;
pub const STK_HL: usize = 27;
pub const STK_R: usize = 30;
pub const STK_EI: usize = 34;
pub const STK_AF: usize = 37;
pub const STK_JP: usize = 39;

/// Page unpacker for 128K cartridges, loaded at 32202. Selects the RAM bank
/// named by its final byte, then decodes the page data following at 32256.
/// Subsequent page files only replace that final byte.
pub const UNPACK: [u8; 54] = [
    0x3a, 0xff, 0x7d, //              ld a,(32255)
    0x01, 0xfd, 0x7f, //              ld bc, 0x7ffd
    0xed, 0x79, //                    out (c),a
    0x21, 0x00, 0x7e, //              ld hl, 32256
    0x11, 0x00, 0xc0, //              ld de, 0xc000
    0x7e, 0x23, 0xfe, 0x80, 0x30, 0x08, //
    0x4f, 0x06, 0x00, 0x03, 0xed, 0xb0, 0x18, 0x14, //
    0x4e, 0x23, 0x46, 0x23, 0xe5, 0x62, 0x6b, 0xb7, 0xed, 0x42, //
    0xe6, 0x7f, 0xc6, 0x03, 0x4f, 0x06, 0x00, 0xed, 0xb0, 0xe1, //
    0x7a, 0xb7, //                    ld a,d; or a
    0x20, 0xda, //                    jr nz, loop (D wraps to 0 at 65536)
    0xc9, //                          ret
    0x11, //                          page byte                UNPACK_PAGE
];
pub const UNPACK_PAGE: usize = 53;
/// Load address of the page unpacker.
pub const UNPACK_START: usize = 32256 - UNPACK.len();

/// Screen loader prefixed to the screen file, loaded and called at 32179.
/// Decodes the screen data following it straight into 16384..23296.
pub const SCR_LOAD: [u8; 53] = [
    0x21, 0xe8, 0x7d, //              ld hl, 32232
    0x11, 0x00, 0x40, //              ld de, 16384
    0x7e, 0x23, 0xfe, 0x80, 0x30, 0x08, //
    0x4f, 0x06, 0x00, 0x03, 0xed, 0xb0, 0x18, 0x14, //
    0x4e, 0x23, 0x46, 0x23, 0xe5, 0x62, 0x6b, 0xb7, 0xed, 0x42, //
    0xe6, 0x7f, 0xc6, 0x03, 0x4f, 0x06, 0x00, 0xed, 0xb0, 0xe1, //
    0x7a, 0xfe, 0x5b, //              ld a,d; cp 0x5b
    0x38, 0xd9, 0x20, 0x05, //
    0x7b, 0xfe, 0x00, //
    0x38, 0xd2, //
    0xc9, //                          ret
];
/// Load address of the screen file.
pub const SCR_LOAD_START: usize = 32179;

/// Start address of the packed BASIC loader.
pub const BLN_START: usize = 23813;

/// Patch offsets into the BASIC loader built by [build_bln].
#[derive(Debug, Clone, Copy, Default)]
pub struct BlnOffsets {
    pub brd: usize,
    pub clear: usize,
    pub to: usize,
    pub i: usize,
    pub bca: usize,
    pub dea: usize,
    pub hla: usize,
    pub afa: usize,
    pub iy: usize,
    pub ix: usize,
    pub pap: usize,
    pub ayp: usize,
    pub fffd: usize,
    pub ay: usize,
    pub fcpy: usize,
    pub cpyf: usize,
    pub cpyx: usize,
    pub im: usize,
    pub jp: usize,
    pub ts: usize,
}

struct Asm {
    data: Vec<u8>,
}

impl Asm {
    fn new() -> Self {
        Asm { data: Vec::with_capacity(256) }
    }

    fn emit(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Emits bytes and returns the offset of the first one.
    fn mark(&mut self, bytes: &[u8]) -> usize {
        let at = self.data.len();
        self.emit(bytes);
        at
    }

    // a BASIC line: big endian number, little endian length, body, enter
    fn line(&mut self, number: u16, body: &mut dyn FnMut(&mut Asm)) {
        self.emit(&number.to_be_bytes());
        let len_at = self.data.len();
        self.emit(&[0, 0]);
        let start = self.data.len();
        body(self);
        self.emit(&[0x0d]);
        let len = (self.data.len() - start) as u16;
        self.data[len_at..len_at + 2].copy_from_slice(&len.to_le_bytes());
    }
}

// ZX BASIC tokens used by the loader
const T_BORDER: u8 = 0xe7;
const T_CLEAR: u8 = 0xfd;
const T_VAL: u8 = 0xb0;
const T_FOR: u8 = 0xeb;
const T_TO: u8 = 0xcc;
const T_NEXT: u8 = 0xf3;
const T_LOAD: u8 = 0xef;
const T_CODE: u8 = 0xaf;
const T_RANDOMIZE: u8 = 0xf9;
const T_USR: u8 = 0xc0;
const T_STR: u8 = 0xc1;

/// Builds the BASIC loader with its trailing machine code part.
///
/// The program restores border and paper, loads the page files, the screen
/// and the main block, then jumps into the machine code, which restores I,
/// the alternate registers, IY, IX and the AY state, copies the launcher
/// prefix into place and jumps to it.
pub fn build_bln() -> (Vec<u8>, BlnOffsets) {
    let mut asm = Asm::new();
    let mut offs = BlnOffsets::default();

    // 10 BORDER VAL "0": CLEAR nnnnn
    asm.line(10, &mut |a: &mut Asm| {
        a.emit(&[T_BORDER, T_VAL, b'"']);
        offs.brd = a.mark(&[b'0']);
        a.emit(&[b'"', b':', T_CLEAR]);
        a.emit(b"99999");
        a.emit(&[0x0e, 0x00, 0x00]);
        offs.clear = a.mark(&[0x00, 0x00]);
        a.emit(&[0x00]);
    });

    // 20 FOR f=VAL "1" TO VAL "5": LOAD *"m";VAL "1";STR$ f CODE:
    //    RANDOMIZE USR VAL "32202": NEXT f
    let usr_unpack = format!("{}", UNPACK_START);
    asm.line(20, &mut |a: &mut Asm| {
        a.emit(&[T_FOR, b'f', b'=', T_VAL, b'"', b'1', b'"', T_TO, T_VAL, b'"']);
        offs.to = a.mark(&[b'5']);
        a.emit(&[b'"', b':']);
        a.emit(&[T_LOAD, b'*', b'"', b'm', b'"', b';', T_VAL, b'"', b'1', b'"', b';']);
        a.emit(&[T_STR, b'f', T_CODE, b':']);
        a.emit(&[T_RANDOMIZE, T_USR, T_VAL, b'"']);
        a.emit(usr_unpack.as_bytes());
        a.emit(&[b'"', b':', T_NEXT, b'f']);
    });

    // 30 LOAD *"m";VAL "1";"0" CODE: RANDOMIZE USR VAL "32179"
    let usr_scr = format!("{}", SCR_LOAD_START);
    asm.line(30, &mut |a: &mut Asm| {
        a.emit(&[T_LOAD, b'*', b'"', b'm', b'"', b';', T_VAL, b'"', b'1', b'"', b';']);
        a.emit(&[b'"', b'0', b'"', T_CODE, b':']);
        a.emit(&[T_RANDOMIZE, T_USR, T_VAL, b'"']);
        a.emit(usr_scr.as_bytes());
        a.emit(&[b'"']);
    });

    // 40 LOAD *"m";VAL "1";"M" CODE: RANDOMIZE USR VAL "<mc>"
    // the machine code part follows the program immediately, so its address
    // is the program length; the digit count below keeps that length stable
    let prog_guess = asm.data.len() + 4 + 27;
    let usr_mc = format!("{}", BLN_START + prog_guess);
    asm.line(40, &mut |a: &mut Asm| {
        a.emit(&[T_LOAD, b'*', b'"', b'm', b'"', b';', T_VAL, b'"', b'1', b'"', b';']);
        a.emit(&[b'"', b'M', b'"', T_CODE, b':']);
        a.emit(&[T_RANDOMIZE, T_USR, T_VAL, b'"']);
        a.emit(usr_mc.as_bytes());
        a.emit(&[b'"']);
    });

    let mc_base = BLN_START + asm.data.len();
    debug_assert_eq!(mc_base, BLN_START + prog_guess);

    // machine code part
    asm.emit(&[0xf3]); //                          di
    asm.emit(&[0x31]);
    offs.ts = asm.mark(&[0x00, 0x00]); //          ld sp, <AF' data>
    asm.emit(&[0xf1, 0x08]); //                    pop af; ex af,af'
    asm.emit(&[0x3e]);
    offs.i = asm.mark(&[0x00]); //                 ld a, <I>
    asm.emit(&[0xed, 0x47]); //                    ld i,a
    asm.emit(&[0x01]);
    offs.bca = asm.mark(&[0x00, 0x00]); //         ld bc, <BC'>
    asm.emit(&[0x11]);
    offs.dea = asm.mark(&[0x00, 0x00]); //         ld de, <DE'>
    asm.emit(&[0x21]);
    offs.hla = asm.mark(&[0x00, 0x00]); //         ld hl, <HL'>
    asm.emit(&[0xd9]); //                          exx
    asm.emit(&[0xfd, 0x21]);
    offs.iy = asm.mark(&[0x00, 0x00]); //          ld iy, <IY>
    asm.emit(&[0xdd, 0x21]);
    offs.ix = asm.mark(&[0x00, 0x00]); //          ld ix, <IX>
    asm.emit(&[0x3e]);
    offs.pap = asm.mark(&[0x00]); //               ld a, <attribute>
    asm.emit(&[0x32, 0x8d, 0x5c]); //              ld (23693),a
    asm.emit(&[0x21]);
    offs.ayp = asm.mark(&[0x00, 0x00]); //         ld hl, <AY data>
    asm.emit(&[0xaf]); //                          xor a
    let ay_loop = asm.data.len();
    asm.emit(&[0x01, 0xfd, 0xff]); //              ld bc, 0xfffd
    asm.emit(&[0xed, 0x79]); //                    out (c),a
    asm.emit(&[0x56, 0x23]); //                    ld d,(hl); inc hl
    asm.emit(&[0x06, 0xbf]); //                    ld b, 0xbf
    asm.emit(&[0xed, 0x51]); //                    out (c),d
    asm.emit(&[0x3c, 0xfe, 0x10]); //              inc a; cp 16
    let disp = ay_loop as i32 - (asm.data.len() + 2) as i32;
    asm.emit(&[0x20, disp as u8]); //              jr nz, <ay loop>
    asm.emit(&[0x3e]);
    offs.fffd = asm.mark(&[0x00]); //              ld a, <selected reg>
    asm.emit(&[0x01, 0xfd, 0xff]); //              ld bc, 0xfffd
    asm.emit(&[0xed, 0x79]); //                    out (c),a
    asm.emit(&[0x21]);
    offs.fcpy = asm.mark(&[0x00, 0x00]); //        ld hl, <loaded block>
    asm.emit(&[0x11]);
    offs.cpyf = asm.mark(&[0x00, 0x5b]); //        ld de, <target 23296>
    asm.emit(&[0x01]);
    offs.cpyx = asm.mark(&[0x3a, 0x00]); //        ld bc, <prefix length>
    asm.emit(&[0xed, 0xb0]); //                    ldir
    asm.emit(&[0xed]);
    offs.im = asm.mark(&[0x56]); //                im 1
    asm.emit(&[0xc3]);
    offs.jp = asm.mark(&[0x02, 0x5b]); //          jp 23298
    offs.afa = asm.mark(&[0x00, 0x00]); //         F', A'
    offs.ay = asm.mark(&[0; 16]); //               AY registers

    let mut data = asm.data;
    // array offsets are program relative, memory addresses start at 23813
    let ts = (BLN_START + offs.afa) as u16;
    data[offs.ts..offs.ts + 2].copy_from_slice(&ts.to_le_bytes());
    let ayp = (BLN_START + offs.ay) as u16;
    data[offs.ayp..offs.ayp + 2].copy_from_slice(&ayp.to_le_bytes());
    (data, offs)
}

/// Launcher placement strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LauncherStyle {
    Screen,
    Hidden,
}

/// Carries all launcher pieces while a snapshot is being packed.
pub struct Launcher {
    style: LauncherStyle,
    pub bln: Vec<u8>,
    pub bln_offs: BlnOffsets,
    pub scr: Vec<u8>,
    pub prt: Vec<u8>,
    pub igp: Vec<u8>,
    pub stk: Vec<u8>,
    igp_pos: usize,
    compressed: bool,
    otek: bool,
    add_len: usize,
    stk_pos: usize,
    hw_mode: u8,
}

impl Launcher {
    pub fn new(style: &str) -> Result<Self> {
        let style = match style {
            "screen" => LauncherStyle::Screen,
            "hidden" | "" => LauncherStyle::Hidden,
            other => {
                return Err(Error::Unsupported(format!(
                    "unsupported launcher type: '{}'",
                    other
                )))
            }
        };
        debug!("launcher created: {:?}", style);
        let (bln, bln_offs) = build_bln();
        Ok(Launcher {
            style,
            bln,
            bln_offs,
            scr: LAUNCH_SCR.to_vec(),
            prt: LAUNCH_PRT.to_vec(),
            igp: LAUNCH_IGP.to_vec(),
            stk: LAUNCH_STK.to_vec(),
            igp_pos: 0,
            compressed: false,
            otek: false,
            add_len: 0,
            stk_pos: 0,
            hw_mode: 0,
        })
    }

    #[inline]
    pub fn style(&self) -> LauncherStyle {
        self.style
    }

    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    #[inline]
    pub fn hardware_mode(&self) -> u8 {
        self.hw_mode
    }

    /// 128K snapshot?
    #[inline]
    pub fn is_otek(&self) -> bool {
        self.otek
    }

    /// Length of the version 2/3 extended header, 0 for version 1.
    #[inline]
    pub fn add_length(&self) -> usize {
        self.add_len
    }

    /// Absolute address of the under-stack routine.
    #[inline]
    pub fn stack_pos(&self) -> usize {
        self.stk_pos
    }

    /// Start of the compressed image, relative to 16384.
    pub fn start_pos(&self) -> usize {
        match self.style {
            LauncherStyle::Screen => 6912,
            LauncherStyle::Hidden => 6912 + LAUNCH_PRT.len(),
        }
    }

    /// Size of the compressed image; start and size always cover the
    /// address space up to 65536.
    pub fn main_size(&self) -> usize {
        49152 - self.start_pos()
    }

    fn set_u16(buf: &mut [u8], at: usize, value: usize) {
        buf[at] = value as u8;
        buf[at + 1] = (value >> 8) as u8;
    }

    /// Parses the snapshot header and distributes the register state over
    /// the launcher pieces.
    pub fn setup(&mut self, rd: &mut SliceReader, sna: bool, size: usize) -> Result<()> {
        if sna {
            self.setup_sna(rd, size)
        } else {
            self.setup_z80(rd)
        }
    }

    fn set_af(&mut self, a: u8, f: u8) {
        self.scr[SCR_AF] = f;
        self.scr[SCR_AF + 1] = a;
        self.stk[STK_AF] = f;
        self.stk[STK_AF + 1] = a;
    }

    fn set_pc(&mut self, lo: u8, hi: u8) {
        self.scr[SCR_JP] = lo;
        self.scr[SCR_JP + 1] = hi;
        self.stk[STK_JP] = lo;
        self.stk[STK_JP + 1] = hi;
    }

    fn set_sp(&mut self, sp: usize) {
        let mut sp = sp;
        if sp == 0 {
            sp = 65536;
        }
        self.stk_pos = sp - LAUNCH_STK.len();
        // the data under the stack the launcher pops from
        Self::set_u16(&mut self.scr, SCR_SP, sp & 0xffff);
        let p = self.stk_pos + STK_AF;
        Self::set_u16(&mut self.igp, IGP_RD, p);
    }

    fn set_ei(&mut self, iff: u8) {
        let op = if iff == 0 { 0xf3 } else { 0xfb };
        self.scr[SCR_EI] = op;
        self.stk[STK_EI] = op;
    }

    fn set_im(&mut self, mode: u8) {
        self.bln[self.bln_offs.im] = match mode & 3 {
            0 => 0x46,
            1 => 0x56,
            _ => 0x5e,
        };
    }

    fn set_border(&mut self, color: u8) {
        self.bln[self.bln_offs.brd] = b'0' + (color & 7);
        self.bln[self.bln_offs.pap] = ((color & 7) << 3) | (color & 7);
    }

    fn setup_z80(&mut self, rd: &mut SliceReader) -> Result<()> {
        let a = rd.byte()?;
        let f = rd.byte()?;
        self.set_af(a, f);

        let bc = rd.word()?;
        Self::set_u16(&mut self.scr, SCR_BC, bc);
        Self::set_u16(&mut self.stk, STK_BC, bc);

        let hl = rd.word()?;
        Self::set_u16(&mut self.scr, SCR_HL, hl);
        Self::set_u16(&mut self.stk, STK_HL, hl);

        let pc = rd.word()?;
        self.set_pc(pc as u8, (pc >> 8) as u8);

        let sp = rd.word()?;
        self.set_sp(sp);

        self.bln[self.bln_offs.i] = rd.byte()?;

        // R is adjusted down so it is roughly correct after launch
        let r = rd.byte()?;
        self.scr[SCR_R] = r.wrapping_sub(4);
        self.stk[STK_R] = r.wrapping_sub(3);

        let mut flags1 = rd.byte()?;
        if flags1 == 0xff {
            flags1 = 1;
        }
        self.compressed = flags1 & 0x20 != 0;
        if flags1 & 1 == 1 {
            self.scr[SCR_R] |= 0x80;
            self.stk[STK_R] |= 0x80;
        } else {
            self.scr[SCR_R] &= 0x7f;
            self.stk[STK_R] &= 0x7f;
        }
        self.set_border((flags1 & 14) >> 1);

        let de = rd.word()?;
        Self::set_u16(&mut self.scr, SCR_DE, de);
        Self::set_u16(&mut self.stk, STK_DE, de);

        let bca = rd.word()?;
        Self::set_u16(&mut self.bln, self.bln_offs.bca, bca);
        let dea = rd.word()?;
        Self::set_u16(&mut self.bln, self.bln_offs.dea, dea);
        let hla = rd.word()?;
        Self::set_u16(&mut self.bln, self.bln_offs.hla, hla);

        let a_alt = rd.byte()?;
        let f_alt = rd.byte()?;
        self.bln[self.bln_offs.afa] = f_alt;
        self.bln[self.bln_offs.afa + 1] = a_alt;

        let iy = rd.word()?;
        Self::set_u16(&mut self.bln, self.bln_offs.iy, iy);
        let ix = rd.word()?;
        Self::set_u16(&mut self.bln, self.bln_offs.ix, ix);

        self.set_ei(rd.byte()?);
        rd.byte()?; // IFF2, ignored
        self.set_im(rd.byte()? & 3);

        self.add_len = 0;
        self.otek = false;

        if pc == 0 {
            // version 2 or 3 extended header
            self.add_len = rd.word()?;
            let pc = rd.word()?;
            self.set_pc(pc as u8, (pc >> 8) as u8);

            self.hw_mode = rd.byte()?;
            if self.add_len == 23 && self.hw_mode > 2 {
                self.otek = true;
            } else if self.add_len != 23 && self.hw_mode > 3 {
                self.otek = true;
            }

            let last_out = rd.byte()?;
            if self.otek {
                self.scr[SCR_OUT] = last_out;
                self.stk[STK_OUT] = last_out;
            }

            rd.skip(2)?; // IF1 rom, hardware modify
            self.bln[self.bln_offs.fffd] = rd.byte()?;
            let ay = rd.take(16)?;
            let at = self.bln_offs.ay;
            self.bln[at..at + 16].copy_from_slice(ay);

            if self.add_len > 23 {
                rd.skip(31)?;
            }
            if self.add_len == 55 {
                if rd.byte()? & 1 == 1 {
                    return Err(Error::Unsupported(
                        "+3/+2A snapshots with special RAM mode enabled not supported. \
                         Microdrives do not work on +3/+2A hardware."
                            .into(),
                    ));
                }
            }
            debug!(
                "finished extended setup: add_len {}, otek {}, last_out {}",
                self.add_len, self.otek, last_out
            );
        } else {
            debug!("finished setup");
        }

        Ok(())
    }

    fn setup_sna(&mut self, rd: &mut SliceReader, size: usize) -> Result<()> {
        if size < 49179 {
            return Err(Error::Corrupt(format!("SNA snapshot too small: {}", size)));
        }
        self.otek = size >= 131103;

        let i = rd.byte()?;
        self.bln[self.bln_offs.i] = i;
        let hla = rd.word()?;
        Self::set_u16(&mut self.bln, self.bln_offs.hla, hla);
        let dea = rd.word()?;
        Self::set_u16(&mut self.bln, self.bln_offs.dea, dea);
        let bca = rd.word()?;
        Self::set_u16(&mut self.bln, self.bln_offs.bca, bca);
        let f_alt = rd.byte()?;
        let a_alt = rd.byte()?;
        self.bln[self.bln_offs.afa] = f_alt;
        self.bln[self.bln_offs.afa + 1] = a_alt;

        let hl = rd.word()?;
        Self::set_u16(&mut self.scr, SCR_HL, hl);
        Self::set_u16(&mut self.stk, STK_HL, hl);
        let de = rd.word()?;
        Self::set_u16(&mut self.scr, SCR_DE, de);
        Self::set_u16(&mut self.stk, STK_DE, de);
        let bc = rd.word()?;
        Self::set_u16(&mut self.scr, SCR_BC, bc);
        Self::set_u16(&mut self.stk, STK_BC, bc);

        let iy = rd.word()?;
        Self::set_u16(&mut self.bln, self.bln_offs.iy, iy);
        let ix = rd.word()?;
        Self::set_u16(&mut self.bln, self.bln_offs.ix, ix);

        // text where registers should be means this is no snapshot
        let probe = [i, hla as u8, (hla >> 8) as u8, dea as u8];
        if &probe == b"MV -" || &probe == b"ZX82" {
            return Err(Error::Corrupt("not a SNA snapshot".into()));
        }

        self.set_ei(rd.byte()?);

        let r = rd.byte()?;
        self.scr[SCR_R] = r;
        self.stk[STK_R] = r;

        let f = rd.byte()?;
        let a = rd.byte()?;
        self.set_af(a, f);

        // SNA stores SP already decremented by 2, with PC on the stack
        let mut sp = rd.word()?;
        if !self.otek {
            sp += 2;
        }
        self.set_sp(sp);

        self.set_im(rd.byte()? & 3);
        self.set_border(rd.byte()? & 7);
        Ok(())
    }

    /// Reads the trailing 128K SNA fields: PC, the last OUT to 0x7ffd and
    /// the TR-DOS flag. Returns the port value.
    pub fn post_setup(&mut self, rd: &mut SliceReader) -> Result<u8> {
        if self.otek {
            let pc = rd.word()?;
            self.set_pc(pc as u8, (pc >> 8) as u8);
            let out = rd.byte()?;
            self.scr[SCR_OUT] = out;
            self.stk[STK_OUT] = out;
            if rd.byte()? != 0 {
                return Err(Error::Corrupt("SNA snapshot with TR-DOS paged in".into()));
            }
        }
        Ok(self.scr[SCR_OUT])
    }

    /// Fixes up the stack related patches once memory is known: fetches the
    /// PC from the stack for 48K SNAs, and follows an `ld sp,nn` at the
    /// program counter when the stack sits in the screen.
    pub fn adjust_stack_pos(&mut self, main: &[u8], sna: bool) -> Result<bool> {
        let stackpos = self.stk_pos + LAUNCH_STK.len();

        if sna && !self.otek {
            if stackpos < 16384 + 2 {
                return Err(Error::Corrupt(format!(
                    "SNA stack pointer too low: {}",
                    stackpos
                )));
            }
            let lo = main[stackpos - 16384 - 2];
            let hi = main[stackpos - 16384 - 1];
            self.set_pc(lo, hi);
        }

        if stackpos < 23296 {
            debug!("stack in screen: {}", self.stk_pos);
            let pc =
                (self.scr[SCR_JP + 1] as usize) * 256 + self.scr[SCR_JP] as usize;
            let i = pc.wrapping_sub(16384);
            if i + 2 < main.len() && main[i] == 0x31 {
                // program starts with ld sp,nn: adopt that stack instead
                let mut sp = (main[i + 2] as usize) * 256 + main[i + 1] as usize;
                if sp == 0 {
                    sp = 65536;
                }
                self.stk_pos = sp - LAUNCH_STK.len();
                debug!("adjusted stack: {}", self.stk_pos);
                Self::set_u16(&mut self.igp, IGP_RD, self.stk_pos + STK_AF);
                return Ok(true);
            }
        } else if self.otek && (self.scr[SCR_OUT] & 7) > 0 && stackpos > 49152 {
            return Err(Error::Unsupported("stack in paged memory won't work".into()));
        }

        Ok(false)
    }

    /// Finds a home for the in-gap routine and copies the hidden launcher
    /// pieces into the memory image. A no-op for the screen launcher.
    pub fn byte_series_scan(&mut self, main: &mut [u8], delta: usize, dgap: usize) -> Result<()> {
        if self.style == LauncherStyle::Screen {
            return Ok(());
        }

        let size = LAUNCH_IGP.len() + delta;
        let stack = self.stk_pos + LAUNCH_STK.len() - 16384;
        debug!(
            "byte series scan: size {}, stack {}, delta {}, dgap {}",
            size, self.stk_pos, delta, dgap
        );

        // the longest run of a single byte value outside the stack window
        let scan_from = 6912 + LAUNCH_PRT.len();
        let mut max_gap = 0;
        let mut max_pos = 0;
        let mut max_chr = 0usize;
        for vgap in 0..=0xffu8 {
            let mut j = 0;
            for ix in scan_from..49152.min(main.len()) {
                if main[ix] == vgap {
                    j += 1;
                    if j > max_gap
                        && (ix - j > stack || ix + LAUNCH_STK.len() < stack)
                    {
                        max_gap = j;
                        max_pos = ix + 1;
                        max_chr = vgap as usize;
                    }
                } else {
                    j = 0;
                }
            }
        }

        if max_gap > size {
            self.igp_pos = max_pos - max_gap;
        } else {
            // no gap large enough, use the attribute area of the screen
            // with its most common byte as the fill value
            self.igp_pos = 6912 - size;
            let mut best_count = 0;
            for chr in 0..=0xffu8 {
                let count = main[self.igp_pos..6912]
                    .iter()
                    .filter(|&&b| b == chr)
                    .count();
                if count >= best_count {
                    best_count = count;
                    max_chr = chr as usize;
                }
            }
            debug!("no large enough gap, using screen attr fill {}", max_chr);
        }

        // is the program counter in the way of the stack routine?
        let pc = (self.stk[STK_JP + 1] as usize) * 256 + self.stk[STK_JP] as usize;
        let mut shift = 0;
        if self.stk_pos <= pc && self.stk_pos + LAUNCH_STK.len() > pc {
            if self.stk_pos + LAUNCH_STK.len() - pc <= 2 {
                return Err(Error::Unsupported(
                    "program counter clashes with launcher".into(),
                ));
            }
            // move the code part down, the data stays below the stack
            shift = STK_AF;
        }
        debug!("byte scan done: igp {}, shift {}", self.igp_pos, shift);

        Self::set_u16(&mut self.prt, PRT_JP, self.igp_pos + 16384);
        Self::set_u16(&mut self.igp, IGP_BDATA, self.igp_pos + IGP_BEGIN + 16384);
        Self::set_u16(&mut self.igp, IGP_DST, (65536 - delta) & 0xffff);
        self.igp[IGP_LCS] = delta as u8;
        self.stk[STK_CHR] = max_chr as u8;
        Self::set_u16(&mut self.stk, STK_GAP, self.igp_pos + 16384);
        Self::set_u16(&mut self.stk, STK_CLR, size - 1);
        Self::set_u16(&mut self.igp, IGP_JP, self.stk_pos - shift);

        // copy the stack routine under the stack
        if shift > 0 {
            let at = self.stk_pos - 16384 - shift;
            main[at..at + LAUNCH_STK.len() - 4].copy_from_slice(&self.stk[..LAUNCH_STK.len() - 4]);
            let tail = self.stk_pos + LAUNCH_STK.len() - 16384 - 4;
            main[tail..tail + 4].copy_from_slice(&self.stk[LAUNCH_STK.len() - 4..]);
        } else {
            if self.stk_pos < 16384 {
                return Err(Error::Corrupt(format!(
                    "corrupted snapshot data - stack too low: {}",
                    self.stk_pos
                )));
            }
            let at = self.stk_pos - 16384;
            main[at..at + LAUNCH_STK.len()].copy_from_slice(&self.stk);
        }

        // unless the gap is in the screen attributes, the in-gap routine
        // becomes part of the compressed image: stash the delta bytes and
        // the printer buffer content behind it and copy it in
        if self.igp_pos >= 6912 {
            let bdata = self.igp_pos + IGP_BEGIN;
            main.copy_within(49152 - delta..49152, bdata);
            main.copy_within(6912..6912 + LAUNCH_PRT.len(), bdata + delta);
            let igp = &self.igp[..IGP_BEGIN];
            main[self.igp_pos..self.igp_pos + IGP_BEGIN].copy_from_slice(igp);
        }

        Ok(())
    }

    /// Computes the prefix length added in front of the compressed stream,
    /// patches the BASIC loader accordingly and verifies the fit.
    pub fn get_adder(&mut self, delta: usize, cm_size: usize, max_size: usize) -> Result<usize> {
        use crate::z80::compress::BGAP;

        let adder = match self.style {
            LauncherStyle::Screen => SCR_DELTA + delta,
            LauncherStyle::Hidden => {
                if self.igp_pos < 6912 {
                    // in-gap routine rides along in the prefix
                    LAUNCH_PRT.len() + IGP_BEGIN + delta + LAUNCH_PRT.len()
                } else {
                    LAUNCH_PRT.len()
                }
            }
        };

        let max_size = max_size - delta;
        let total = cm_size + adder;
        if delta > BGAP || total > max_size {
            return Err(Error::Capacity("too big to fit in Spectrum memory".into()));
        }

        let load = 65536 - total;
        Self::set_u16(&mut self.bln, self.bln_offs.fcpy, load);
        Self::set_u16(&mut self.bln, self.bln_offs.clear, load - 1);
        Self::set_u16(&mut self.bln, self.bln_offs.cpyx, adder);

        match self.style {
            LauncherStyle::Screen => {
                Self::set_u16(&mut self.bln, self.bln_offs.cpyf, 16384);
                Self::set_u16(&mut self.bln, self.bln_offs.jp, 16384);
                Self::set_u16(&mut self.scr, SCR_SRC, load + adder);
                self.scr[SCR_END_LO] = ((65536 - delta) & 0xff) as u8;
                self.scr[SCR_END_HI] = (((65536 - delta) >> 8) & 0xff) as u8;
                Self::set_u16(&mut self.scr, SCR_LCF, 16384 + SCR_DELTA);
                self.scr[SCR_LCS] = delta as u8;
            }
            LauncherStyle::Hidden => {
                let target = if self.igp_pos < 6912 {
                    // land the prefix so the in-gap code ends up at its spot
                    16384 + self.igp_pos
                } else {
                    23296
                };
                Self::set_u16(&mut self.bln, self.bln_offs.cpyf, target);
                Self::set_u16(&mut self.bln, self.bln_offs.jp, 23298);
                Self::set_u16(&mut self.prt, PRT_SRC, load + adder);
                self.prt[PRT_END_LO] = ((65536 - delta) & 0xff) as u8;
                self.prt[PRT_END_HI] = (((65536 - delta) >> 8) & 0xff) as u8;
            }
        }

        if !self.otek {
            self.bln[self.bln_offs.to] = b'0'; // FOR f=1 TO 0, no page files
        }

        Ok(adder)
    }

    /// Copies the launcher prefix in front of the compressed stream, which
    /// starts at `comp[8704]`.
    pub fn flush_main(&mut self, comp: &mut [u8], main: &[u8], adder: usize, delta: usize) {
        match self.style {
            LauncherStyle::Screen => {
                comp[8704 - adder..8704 - adder + SCR_DELTA].copy_from_slice(&self.scr);
                comp[8704 - adder + SCR_DELTA..8704]
                    .copy_from_slice(&main[49152 - delta..49152]);
            }
            LauncherStyle::Hidden => {
                if self.igp_pos < 6912 {
                    let at = 8704 - adder;
                    comp[at..at + IGP_BEGIN].copy_from_slice(&self.igp[..IGP_BEGIN]);
                    comp[at + IGP_BEGIN..at + IGP_BEGIN + delta]
                        .copy_from_slice(&main[49152 - delta..49152]);
                    comp[at + IGP_BEGIN + delta..at + IGP_BEGIN + delta + LAUNCH_PRT.len()]
                        .copy_from_slice(&main[6912..6912 + LAUNCH_PRT.len()]);
                }
                comp[8704 - LAUNCH_PRT.len()..8704].copy_from_slice(&self.prt);
            }
        }
    }

    /// The "run" file payload: the patched BASIC loader.
    pub fn flush_run(&self) -> Vec<u8> {
        self.bln.clone()
    }
}

/// Validates a Z80 hardware mode byte against the snapshot version,
/// returning the human readable machine name.
pub fn validate_hardware_mode(mode: u8, version: u8) -> Result<&'static str> {
    let (hw, supported) = match mode {
        0 => ("48k", true),
        1 => ("48k + If.1", true),
        2 => ("SamRam", false),
        3 => {
            if version == 2 {
                ("128k", true)
            } else {
                ("48k + M.G.T.", true)
            }
        }
        4 => {
            if version == 2 {
                ("128k + If.1", true)
            } else {
                ("128k", true)
            }
        }
        5 => {
            if version == 3 {
                ("128k + If.1", true)
            } else {
                ("", true)
            }
        }
        6 => {
            if version == 3 {
                ("128k + M.G.T.", true)
            } else {
                ("", true)
            }
        }
        7 => ("Spectrum +3", true),
        8 => ("Spectrum +3 (incorrect)", true),
        9 => ("Pentagon (128K)", true),
        10 => ("Scorpion (256K)", false),
        11 => ("Didaktik-Kompakt", false),
        12 => ("Spectrum +2", true),
        13 => ("Spectrum +2A", true),
        14 => ("TC2048", false),
        15 => ("TC2068", false),
        128 => ("TS2068", false),
        _ => ("", true),
    };

    if hw.is_empty() {
        return Err(Error::Unsupported(format!("invalid h/w mode: {}", mode)));
    }
    if !supported {
        return Err(Error::Unsupported(format!(
            "unsupported h/w mode: {} ({})",
            hw, mode
        )));
    }
    Ok(hw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_offsets_sit_on_operands() {
        // every 16-bit patch offset must directly follow its opcode
        assert_eq!(LAUNCH_PRT[PRT_SRC - 1], 0x21);
        assert_eq!(LAUNCH_PRT[PRT_JP - 1], 0xc3);
        assert_eq!(LAUNCH_PRT[PRT_END_HI - 1], 0xfe);
        assert_eq!(LAUNCH_PRT[PRT_END_LO - 1], 0xfe);
        assert_eq!(LAUNCH_SCR[SCR_SRC - 1], 0x21);
        assert_eq!(LAUNCH_SCR[SCR_LCF - 1], 0x21);
        assert_eq!(LAUNCH_SCR[SCR_LCS - 1], 0x01);
        assert_eq!(LAUNCH_SCR[SCR_OUT - 1], 0x3e);
        assert_eq!(LAUNCH_SCR[SCR_DE - 1], 0x11);
        assert_eq!(LAUNCH_SCR[SCR_BC - 1], 0x01);
        assert_eq!(LAUNCH_SCR[SCR_HL - 1], 0x21);
        assert_eq!(LAUNCH_SCR[SCR_R - 1], 0x3e);
        assert_eq!(LAUNCH_SCR[SCR_SP - 1], 0x31);
        assert_eq!(LAUNCH_SCR[SCR_JP - 1], 0xc3);
        assert_eq!(LAUNCH_IGP[IGP_BDATA - 1], 0x21);
        assert_eq!(LAUNCH_IGP[IGP_DST - 1], 0x11);
        assert_eq!(LAUNCH_IGP[IGP_LCS - 1], 0x01);
        assert_eq!(LAUNCH_IGP[IGP_RD - 1], 0x31);
        assert_eq!(LAUNCH_IGP[IGP_JP - 1], 0xc3);
        assert_eq!(LAUNCH_STK[STK_GAP - 1], 0x21);
        assert_eq!(LAUNCH_STK[STK_CHR - 1], 0x36);
        assert_eq!(LAUNCH_STK[STK_CLR - 1], 0x01);
        assert_eq!(LAUNCH_STK[STK_OUT - 1], 0x3e);
        assert_eq!(LAUNCH_STK[STK_DE - 1], 0x11);
        assert_eq!(LAUNCH_STK[STK_BC - 1], 0x01);
        assert_eq!(LAUNCH_STK[STK_HL - 1], 0x21);
        assert_eq!(LAUNCH_STK[STK_R - 1], 0x3e);
        assert_eq!(UNPACK[UNPACK_PAGE], 0x11);
        assert_eq!(UNPACK[UNPACK_PAGE - 1], 0xc9);
    }

    #[test]
    fn stack_data_ends_at_saved_sp() {
        // pop af (2) plus retn (2) consume the last 4 bytes
        assert_eq!(STK_AF + 4, LAUNCH_STK.len());
        assert_eq!(STK_JP + 2, LAUNCH_STK.len());
    }

    #[test]
    fn bln_builds_with_stable_layout() {
        let (bln, offs) = build_bln();
        // machine code part starts where line 40 predicted it
        assert_eq!(bln[offs.im - 1], 0xed);
        assert!([0x46, 0x56, 0x5e].contains(&bln[offs.im]));
        assert_eq!(bln[offs.jp - 1], 0xc3);
        assert_eq!(bln[offs.i - 1], 0x3e);
        assert_eq!(bln[offs.bca - 1], 0x01);
        assert_eq!(bln[offs.dea - 1], 0x11);
        assert_eq!(bln[offs.hla - 1], 0x21);
        assert_eq!(bln[offs.brd], b'0');
        assert_eq!(bln[offs.to], b'5');
        assert_eq!(offs.ay - offs.afa, 2);
        assert_eq!(bln.len(), offs.ay + 16);
    }

    #[test]
    fn launcher_styles() {
        let l = Launcher::new("hidden").unwrap();
        assert_eq!(l.style(), LauncherStyle::Hidden);
        assert_eq!(l.start_pos(), 6970);
        assert_eq!(l.main_size(), 42182);
        let l = Launcher::new("").unwrap();
        assert_eq!(l.style(), LauncherStyle::Hidden);
        let l = Launcher::new("screen").unwrap();
        assert_eq!(l.start_pos(), 6912);
        assert_eq!(l.main_size(), 42240);
        assert!(Launcher::new("magic").is_err());
    }

    #[test]
    fn hardware_modes() {
        for mode in [0u8, 1, 3, 4, 7, 8, 9, 12, 13] {
            assert!(validate_hardware_mode(mode, 2).is_ok(), "mode {}", mode);
        }
        for mode in [5u8, 6] {
            assert!(validate_hardware_mode(mode, 3).is_ok());
            assert!(validate_hardware_mode(mode, 2).is_err());
        }
        for mode in [2u8, 10, 11, 14, 15, 128] {
            let err = validate_hardware_mode(mode, 3).unwrap_err();
            assert!(err.to_string().contains("unsupported"));
        }
        assert!(validate_hardware_mode(42, 2).is_err());
        assert_eq!(validate_hardware_mode(3, 2).unwrap(), "128k");
        assert_eq!(validate_hardware_mode(3, 3).unwrap(), "48k + M.G.T.");
    }
}
