//! Benchmarks for shader transpilation
//!
//! Author: Moroya Sakamoto

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use forge_fsl::compile::FslContainer;
use forge_fsl::prelude::*;
use forge_fsl::types::lines_from_text;
use std::path::Path;

const VERT: &str = "\
STRUCT(VSInput)
{
\tDATA(float3, Position, POSITION);
\tDATA(float3, Normal, NORMAL);
\tDATA(float2, UV, TEXCOORD0);
};
STRUCT(VSOutput)
{
\tDATA(float4, Position, SV_Position);
\tDATA(float3, Normal, NORMAL);
\tDATA(float2, UV, TEXCOORD0);
};
CBUFFER(Uniforms, UPDATE_FREQ_PER_FRAME, b0, binding = 0)
{
\tDATA(float4x4, mvp, None);
\tDATA(float4x4, world, None);
};
RES(Tex2D(float4), heightMap, UPDATE_FREQ_NONE, t0, binding = 1);
RES(SamplerState, linearSampler, UPDATE_FREQ_NONE, s0, binding = 2);

float height(float2 uv)
{
\treturn SampleLvlTex2D(Get(heightMap), Get(linearSampler), uv, 0).x;
}

VSOutput VS_MAIN(VSInput(In))
{
\tINIT_MAIN;
\tVSOutput Out;
\tfloat3 p = In.Position + In.Normal * height(In.UV);
\tOut.Position = mul(Get(mvp), float4(p, 1.0f));
\tOut.Normal = mul(Get(world), float4(In.Normal, 0.0f)).xyz;
\tOut.UV = In.UV;
\tRETURN(Out);
}
";

fn vertex_binary() -> ShaderBinary {
    let mut binary = ShaderBinary::new(Stage::Vert, "bench.vert", "bench.fsl");
    binary.lines = lines_from_text(VERT, "bench.vert.fsl");
    binary
}

fn bench_reader(c: &mut Criterion) {
    let binary = vertex_binary();
    let mut group = c.benchmark_group("reader");
    group.throughput(Throughput::Elements(binary.lines.len() as u64));
    group.bench_function("read_shader", |b| b.iter(|| read_shader(black_box(&binary))));
    group.finish();
}

fn bench_generators(c: &mut Criterion) {
    let binary = vertex_binary();
    let config = GenerateConfig::default();
    let mut group = c.benchmark_group("generate");

    for platform in [Platform::Direct3D12, Platform::Orbis, Platform::Vulkan, Platform::Gles, Platform::Macos] {
        group.bench_with_input(BenchmarkId::from_parameter(platform), &platform, |b, &p| {
            b.iter(|| generate_source(black_box(p), &config, black_box(&binary)))
        });
    }
    group.finish();
}

fn bench_shader_list(c: &mut Criterion) {
    let mut text = String::new();
    for i in 0..32 {
        text.push_str(&format!("#pragma FT_INVARIANT\n#vert IDX={} bench{}.vert\n{}#end\n", i, i, VERT));
    }
    c.bench_function("parse_shader_list_32", |b| {
        b.iter(|| parse_shader_list_text(black_box(&text), Path::new("bench.fsl"), &[]))
    });
}

fn bench_container(c: &mut Criterion) {
    let mut container = FslContainer::new(false);
    for i in 0..4 {
        container.push(i, vec![0xCD; 64 * 1024]);
    }
    let bytes = container.to_bytes();
    let mut group = c.benchmark_group("container");
    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_function("to_bytes", |b| b.iter(|| black_box(&container).to_bytes()));
    group.bench_function("from_bytes", |b| b.iter(|| FslContainer::from_bytes(black_box(&bytes))));
    group.finish();
}

criterion_group!(benches, bench_reader, bench_generators, bench_shader_list, bench_container);
criterion_main!(benches);
