use criterion::{black_box, criterion_group, criterion_main, Criterion};

use agent_stream::config::ErrorDisplay;
use agent_stream::dispatch::Dispatcher;
use agent_stream::message::{AssembledMessage, MessageAssembler};
use agent_stream::stream::{classify, EventDecoder, ParsedEvent};

fn sse_body(frames: usize) -> Vec<u8> {
    let mut body = String::with_capacity(frames * 48);
    for idx in 0..frames {
        body.push_str("data: {\"text\":\"token ");
        body.push_str(&idx.to_string());
        body.push_str(" 节奏\",\"metadata\":{\"i\":1}}\n\n");
    }
    body.push_str("[DONE]\n");
    body.into_bytes()
}

fn bench_classify(c: &mut Criterion) {
    let json_line = "data: {\"text\":\"Hello there, how can I help?\"}";
    let plain_line = "data: just some plain streamed text";
    let sentinel = "[DONE]";

    c.bench_function("classify_json_payload", |b| {
        b.iter(|| black_box(classify(black_box(json_line))));
    });

    c.bench_function("classify_plain_payload", |b| {
        b.iter(|| black_box(classify(black_box(plain_line))));
    });

    c.bench_function("classify_sentinel", |b| {
        b.iter(|| black_box(classify(black_box(sentinel))));
    });
}

fn bench_decode_chunked(c: &mut Criterion) {
    let body = sse_body(512);

    for chunk_size in [7_usize, 64, 1024] {
        c.bench_function(&format!("event_decoder_512_frames_chunk_{chunk_size}"), |b| {
            let mut events = Vec::with_capacity(600);
            b.iter(|| {
                events.clear();
                let mut decoder = EventDecoder::default();
                for chunk in body.chunks(chunk_size) {
                    decoder.feed_into(black_box(chunk), &mut events);
                }
                decoder.finish_into(&mut events);
                black_box(events.len());
            });
        });
    }
}

fn bench_assemble(c: &mut Criterion) {
    let events: Vec<ParsedEvent> = (0..512)
        .map(|idx| ParsedEvent::Token(format!("token {idx} ")))
        .chain(std::iter::once(ParsedEvent::Done))
        .collect();

    c.bench_function("dispatch_assemble_512_tokens", |b| {
        b.iter(|| {
            let mut assembler = MessageAssembler::new(
                AssembledMessage::assistant("m", "s", "a"),
                ErrorDisplay::Replace,
            );
            let mut dispatcher = Dispatcher::new();
            for event in &events {
                dispatcher.dispatch(black_box(event), &mut assembler);
            }
            black_box(assembler.message().content().len());
        });
    });
}

criterion_group!(benches, bench_classify, bench_decode_chunked, bench_assemble);
criterion_main!(benches);
