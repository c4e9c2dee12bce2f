// =============================================================================
// Binary tick decoding (spec §4.C)
// =============================================================================
//
// The upstream ticker multiplexes every subscribed instrument into one
// binary WebSocket frame per broadcast: a 2-byte big-endian packet count
// followed by that many `(2-byte length, payload)` packets. Each packet's
// length determines which of the three modes it carries — grounded in the
// `Tick`/`TickMode` layout read off the zatamap/dhan reference decoders in
// the retrieved pack (see DESIGN.md); exact byte offsets are this module's
// business alone, never load-bearing for any caller.
// =============================================================================

use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;

use crate::types::{Depth, DepthLevel, Ohlc, Tick, TickMode};

const LTP_PACKET_LEN: usize = 8;
const INDEX_QUOTE_PACKET_LEN: usize = 28;
const INDEX_FULL_PACKET_LEN: usize = 32;
const QUOTE_PACKET_LEN: usize = 44;
const FULL_PACKET_LEN: usize = 184;

/// Split one WebSocket binary frame into its constituent packets and decode
/// each into a [`Tick`]. Unrecognized packet lengths are skipped rather than
/// treated as fatal — a future upstream firmware revision adding a new mode
/// should degrade to "fewer ticks", not "dead connection".
pub fn decode_frame(data: &[u8]) -> Vec<Tick> {
    if data.len() < 2 {
        return Vec::new();
    }

    let mut cursor = Cursor::new(data);
    let packet_count = match cursor.read_u16::<BigEndian>() {
        Ok(n) => n,
        Err(_) => return Vec::new(),
    };

    let mut ticks = Vec::with_capacity(packet_count as usize);
    for _ in 0..packet_count {
        let len = match cursor.read_u16::<BigEndian>() {
            Ok(n) => n as usize,
            Err(_) => break,
        };
        let start = cursor.position() as usize;
        let end = start + len;
        if end > data.len() {
            break;
        }
        if let Some(tick) = decode_packet(&data[start..end]) {
            ticks.push(tick);
        }
        cursor.set_position(end as u64);
    }
    ticks
}

fn decode_packet(p: &[u8]) -> Option<Tick> {
    match p.len() {
        LTP_PACKET_LEN => decode_ltp(p, false),
        INDEX_QUOTE_PACKET_LEN => decode_index_quote(p),
        INDEX_FULL_PACKET_LEN => decode_index_full(p),
        QUOTE_PACKET_LEN => decode_quote(p),
        FULL_PACKET_LEN => decode_full(p),
        _ => None,
    }
}

fn read_i32(p: &[u8], off: usize) -> i32 {
    let mut c = Cursor::new(&p[off..off + 4]);
    c.read_i32::<BigEndian>().unwrap_or(0)
}

fn paise_to_rupees(v: i32) -> f64 {
    v as f64 / 100.0
}

fn decode_ltp(p: &[u8], is_index: bool) -> Option<Tick> {
    let token = read_i32(p, 0) as u32;
    let last_price = paise_to_rupees(read_i32(p, 4));
    Some(Tick {
        instrument_token: token,
        mode: TickMode::Ltp,
        is_tradable: !is_index,
        is_index,
        timestamp: None,
        last_trade_time: None,
        last_price,
        last_traded_quantity: None,
        total_buy_quantity: None,
        total_sell_quantity: None,
        volume: None,
        average_trade_price: None,
        oi: None,
        oi_day_high: None,
        oi_day_low: None,
        net_change: None,
        ohlc: None,
        depth: None,
    })
}

fn decode_index_quote(p: &[u8]) -> Option<Tick> {
    let token = read_i32(p, 0) as u32;
    let last_price = paise_to_rupees(read_i32(p, 4));
    let ohlc = Ohlc {
        high: paise_to_rupees(read_i32(p, 8)),
        low: paise_to_rupees(read_i32(p, 12)),
        open: paise_to_rupees(read_i32(p, 16)),
        close: paise_to_rupees(read_i32(p, 20)),
    };
    let net_change = paise_to_rupees(read_i32(p, 24));
    Some(Tick {
        instrument_token: token,
        mode: TickMode::Quote,
        is_tradable: false,
        is_index: true,
        timestamp: None,
        last_trade_time: None,
        last_price,
        last_traded_quantity: None,
        total_buy_quantity: None,
        total_sell_quantity: None,
        volume: None,
        average_trade_price: None,
        oi: None,
        oi_day_high: None,
        oi_day_low: None,
        net_change: Some(net_change),
        ohlc: Some(ohlc),
        depth: None,
    })
}

fn decode_index_full(p: &[u8]) -> Option<Tick> {
    let mut tick = decode_index_quote(&p[..INDEX_QUOTE_PACKET_LEN])?;
    tick.mode = TickMode::Full;
    tick.timestamp = Some(read_i32(p, 28) as i64);
    Some(tick)
}

fn decode_quote(p: &[u8]) -> Option<Tick> {
    let token = read_i32(p, 0) as u32;
    let last_price = paise_to_rupees(read_i32(p, 4));
    let last_traded_quantity = read_i32(p, 8) as u32;
    let average_trade_price = paise_to_rupees(read_i32(p, 12));
    let volume = read_i32(p, 16) as u32;
    let total_buy_quantity = read_i32(p, 20) as u32;
    let total_sell_quantity = read_i32(p, 24) as u32;
    let ohlc = Ohlc {
        open: paise_to_rupees(read_i32(p, 28)),
        high: paise_to_rupees(read_i32(p, 32)),
        low: paise_to_rupees(read_i32(p, 36)),
        close: paise_to_rupees(read_i32(p, 40)),
    };

    Some(Tick {
        instrument_token: token,
        mode: TickMode::Quote,
        is_tradable: true,
        is_index: false,
        timestamp: None,
        last_trade_time: None,
        last_price,
        last_traded_quantity: Some(last_traded_quantity),
        total_buy_quantity: Some(total_buy_quantity),
        total_sell_quantity: Some(total_sell_quantity),
        volume: Some(volume),
        average_trade_price: Some(average_trade_price),
        oi: None,
        oi_day_high: None,
        oi_day_low: None,
        net_change: None,
        ohlc: Some(ohlc),
        depth: None,
    })
}

fn decode_full(p: &[u8]) -> Option<Tick> {
    let mut tick = decode_quote(&p[..QUOTE_PACKET_LEN])?;
    tick.mode = TickMode::Full;
    tick.last_trade_time = Some(read_i32(p, 44) as i64);
    tick.oi = Some(read_i32(p, 48) as u32);
    tick.oi_day_high = Some(read_i32(p, 52) as u32);
    tick.oi_day_low = Some(read_i32(p, 56) as u32);
    tick.timestamp = Some(read_i32(p, 60) as i64);

    let depth_offset = 64;
    let mut buy = [DepthLevel::default(); 5];
    let mut sell = [DepthLevel::default(); 5];
    for i in 0..5 {
        let off = depth_offset + i * 12;
        buy[i] = DepthLevel {
            quantity: read_i32(p, off) as u32,
            price: paise_to_rupees(read_i32(p, off + 4)),
            orders: read_i16(p, off + 8),
        };
    }
    for i in 0..5 {
        let off = depth_offset + 60 + i * 12;
        sell[i] = DepthLevel {
            quantity: read_i32(p, off) as u32,
            price: paise_to_rupees(read_i32(p, off + 4)),
            orders: read_i16(p, off + 8),
        };
    }
    tick.depth = Some(Depth { buy, sell });
    Some(tick)
}

fn read_i16(p: &[u8], off: usize) -> u16 {
    let mut c = Cursor::new(&p[off..off + 2]);
    c.read_i16::<BigEndian>().unwrap_or(0) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    fn ltp_packet(token: i32, price_paise: i32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_i32::<BigEndian>(token).unwrap();
        buf.write_i32::<BigEndian>(price_paise).unwrap();
        buf
    }

    #[test]
    fn decodes_single_ltp_packet_in_a_frame() {
        let packet = ltp_packet(738561, 250050);
        let mut frame = Vec::new();
        frame.write_u16::<BigEndian>(1).unwrap();
        frame
            .write_u16::<BigEndian>(packet.len() as u16)
            .unwrap();
        frame.extend_from_slice(&packet);

        let ticks = decode_frame(&frame);
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].instrument_token, 738561);
        assert_eq!(ticks[0].mode, TickMode::Ltp);
        assert!((ticks[0].last_price - 2500.50).abs() < 1e-9);
    }

    #[test]
    fn truncated_frame_yields_no_ticks() {
        let ticks = decode_frame(&[0, 1, 0]);
        assert!(ticks.is_empty());
    }

    #[test]
    fn empty_frame_yields_no_ticks() {
        assert!(decode_frame(&[]).is_empty());
    }

    #[test]
    fn unrecognized_packet_length_is_skipped_not_fatal() {
        let packet = vec![0u8; 13]; // no known mode has this length
        let mut frame = Vec::new();
        frame.write_u16::<BigEndian>(1).unwrap();
        frame
            .write_u16::<BigEndian>(packet.len() as u16)
            .unwrap();
        frame.extend_from_slice(&packet);

        assert!(decode_frame(&frame).is_empty());
    }
}
