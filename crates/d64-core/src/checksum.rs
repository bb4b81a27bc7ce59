//! IPL2 boot checksum.
//!
//! Reproduces the console's boot-ROM integrity checksum bit for bit. Its
//! result over the IPL3 area of a ROM header fingerprints the CIC variant
//! (see [`crate::cic`]). All arithmetic is 32-bit wrapping; the update rules
//! are kept literal because any reordering changes the result.

const MAGIC: u32 = 0x6c07_8965;

/// Number of 32-bit words consumed.
pub const WORDS: usize = 1008;

/// Bytes of input consumed.
pub const WINDOW_LEN: usize = WORDS * 4;

/// Accumulator state for one checksum computation.
struct ChecksumState {
    acc: [u32; 16],
}

#[inline]
fn mix(a0: u32, a1: u32, a2: u32) -> u32 {
    let a1 = if a1 == 0 { a2 } else { a1 };
    let prod = u64::from(a0) * u64::from(a1);
    let diff = ((prod >> 32) as u32).wrapping_sub(prod as u32);
    if diff == 0 { a0 } else { diff }
}

#[inline]
fn word(input: &[u8], idx: usize) -> u32 {
    let off = idx * 4;
    u32::from_be_bytes([input[off], input[off + 1], input[off + 2], input[off + 3]])
}

impl ChecksumState {
    fn new(seed: u8, first: u32) -> Self {
        let init = MAGIC.wrapping_mul(u32::from(seed)).wrapping_add(1) ^ first;
        Self { acc: [init; 16] }
    }

    fn run(&mut self, input: &[u8]) {
        let b = &mut self.acc;
        let mut data = word(input, 0);
        let mut idx = 0usize;
        let mut lp: u32 = 0;

        loop {
            lp += 1;
            let last = data;
            data = word(input, idx);

            b[0] = b[0].wrapping_add(mix(1007u32.wrapping_sub(lp), data, lp));
            b[1] = mix(b[1], data, lp);
            b[2] ^= data;
            b[3] = b[3].wrapping_add(mix(data.wrapping_add(5), MAGIC, lp));

            if last < data {
                b[9] = mix(b[9], data, lp);
            } else {
                b[9] = b[9].wrapping_add(data);
            }

            let sh = last & 0x1f;
            let rot_low = data.rotate_right(sh);
            b[4] = b[4].wrapping_add(rot_low);
            b[7] = mix(b[7], data.rotate_left(sh), lp);

            if data < b[6] {
                b[6] = b[3].wrapping_add(b[6]) ^ data.wrapping_add(lp);
            } else {
                b[6] = b[4].wrapping_add(data) ^ b[6];
            }

            let sh = last >> 27;
            let rot_high = data.rotate_left(sh);
            b[5] = b[5].wrapping_add(rot_high);
            b[8] = mix(b[8], data.rotate_right(sh), lp);

            if lp as usize == WORDS {
                break;
            }

            idx += 1;
            let next = word(input, idx);

            let t = mix(b[15], rot_high, lp);
            b[15] = mix(t, next.rotate_left(data >> 27), lp);

            let t = mix(b[14], rot_low, lp);
            b[14] = mix(t, next.rotate_right(data & 0x1f), lp);

            let self_rot = data.rotate_right(data & 0x1f);
            b[13] = b[13].wrapping_add(self_rot.wrapping_add(next.rotate_right(next & 0x1f)));

            b[10] = mix(b[10].wrapping_add(data), next, lp);
            b[11] = mix(b[11] ^ data, next, lp);
            b[12] = b[12].wrapping_add(b[8] ^ data);
        }
    }

    fn finalize(&self) -> u64 {
        let mut buf = [self.acc[0]; 4];

        for (i, &d) in self.acc.iter().enumerate() {
            let i = i as u32;

            buf[0] = buf[0].wrapping_add(d.rotate_right(d & 0x1f));

            if d < buf[0] {
                buf[1] = buf[1].wrapping_add(d);
            } else {
                buf[1] = mix(buf[1], d, i);
            }

            if (d & 2) >> 1 == d & 1 {
                buf[2] = buf[2].wrapping_add(d);
            } else {
                buf[2] = mix(buf[2], d, i);
            }

            if d & 1 == 1 {
                buf[3] ^= d;
            } else {
                buf[3] = mix(buf[3], d, i);
            }
        }

        let hi = mix(buf[0], buf[1], 16);
        let lo = buf[3] ^ buf[2];
        ((u64::from(hi) << 32) | u64::from(lo)) & 0xffff_ffff_ffff
    }
}

/// Compute the 48-bit IPL2 checksum of `window` with the given seed.
///
/// Returns `None` if `window` is shorter than [`WINDOW_LEN`] bytes; any
/// bytes past that are ignored.
pub fn ipl2_checksum(window: &[u8], seed: u8) -> Option<u64> {
    if window.len() < WINDOW_LEN {
        return None;
    }
    let mut state = ChecksumState::new(seed, word(window, 0));
    state.run(window);
    Some(state.finalize())
}

/// Split a checksum into its (low 32, high 16) halves.
pub fn split(checksum: u64) -> (u32, u32) {
    (checksum as u32, (checksum >> 32) as u32)
}
