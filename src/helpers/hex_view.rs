// Render a block (or any byte run) as a classic hex dump for the demo
// binary and for eyeballing on-disk structures while debugging.

pub fn hex_view(bytes: &[u8]) -> String {
    let mut out = String::new();
    out.push_str(" Offset(h)  00 01 02 03 04 05 06 07 08 09 0A 0B 0C 0D 0E 0F\n");

    for (row, chunk) in bytes.chunks(16).enumerate() {
        let mut line = format!("{:0>10X}  ", row * 16);

        for i in 0..16 {
            match chunk.get(i) {
                Some(byte) => line.push_str(&format!("{byte:02X} ")),
                // ran off the end, pad so the ascii column stays aligned
                None => line.push_str("   "),
            }
        }

        line.push(' ');
        for byte in chunk {
            let mut shown = *byte as char;
            if !shown.is_ascii() || shown.is_ascii_control() {
                shown = '.';
            }
            line.push(shown);
        }

        out.push_str(&line);
        out.push('\n');
    }

    out
}
