//! Example: encoding a synthetic scene with the IA-SSD style backbone.
//!
//! Builds two frames of a flat ground plane with three box-shaped objects,
//! runs the reference backbone on CPU and prints the pyramid, the fused
//! center features and the vote statistics. Sampled levels are dumped as
//! JSON under `target/encode_synthetic/`.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=debug cargo run -p neural_cascade --example encode_synthetic
//! ```

use burn::backend::ndarray::NdArrayDevice;
use burn::backend::NdArray;
use burn::prelude::*;

use neural_cascade::ops::to_host;
use neural_cascade::prelude::*;

type MyBackend = NdArray;

const POINTS_PER_FRAME: usize = 16384;
const OUTPUT_DIR: &str = "target/encode_synthetic";

/// Box centers and half extents.
const OBJECTS: [([f32; 3], [f32; 3]); 3] = [
    ([6.0, 2.0, 0.8], [2.0, 0.9, 0.8]),
    ([12.0, -4.0, 0.8], [2.2, 1.0, 0.8]),
    ([18.0, 5.0, 0.9], [0.4, 0.4, 0.9]),
];

/// Deterministic pseudo-random stream in [0, 1).
fn hash01(seed: u32) -> f32 {
    let mut x = seed.wrapping_mul(0x9E37_79B9);
    x ^= x >> 16;
    x = x.wrapping_mul(0x85EB_CA6B);
    x ^= x >> 13;
    (x & 0x00FF_FFFF) as f32 / 16_777_216.0
}

/// Rows `[batch_index, x, y, z, intensity]` for one frame.
fn frame(batch: usize, rows: &mut Vec<f32>) {
    let ground = POINTS_PER_FRAME * 3 / 4;
    for i in 0..POINTS_PER_FRAME {
        let seed = (batch * POINTS_PER_FRAME + i) as u32 * 4;
        let (u, v, w) = (hash01(seed), hash01(seed + 1), hash01(seed + 2));
        let point = if i < ground {
            [u * 40.0, v * 40.0 - 20.0, w * 0.05]
        } else {
            let (center, half) = OBJECTS[i % OBJECTS.len()];
            [
                center[0] + (u * 2.0 - 1.0) * half[0] + batch as f32,
                center[1] + (v * 2.0 - 1.0) * half[1],
                center[2] + (w * 2.0 - 1.0) * half[2],
            ]
        };
        rows.extend([batch as f32, point[0], point[1], point[2], hash01(seed + 3)]);
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let device = NdArrayDevice::Cpu;
    let batch_size = 2;

    let mut rows = Vec::with_capacity(batch_size * POINTS_PER_FRAME * 5);
    for b in 0..batch_size {
        frame(b, &mut rows);
    }
    let points = Tensor::<MyBackend, 2>::from_data(
        TensorData::new(rows, [batch_size * POINTS_PER_FRAME, 5]),
        &device,
    );
    let batch = PointBatch::from_points(points, batch_size)?
        .with_frame_ids(vec!["synthetic/000000".into(), "synthetic/000001".into()])?;

    let config = EncoderConfig::ia_ssd(3);
    let backbone = ReferenceBackbone::<MyBackend>::new(&config, &device)?
        .with_sample_sink(Box::new(DirectorySink::new(OUTPUT_DIR)));

    println!("Encoding {} frames of {} points", batch_size, POINTS_PER_FRAME);
    let output = backbone.forward(&batch)?;

    println!();
    println!("Pyramid:");
    for (level, entry) in output.pyramid.levels().iter().enumerate() {
        println!(
            "  level {}: {:>5} points x {:>3} channels{}",
            level,
            entry.num_points(),
            entry.num_channels(),
            if entry.class_prediction.is_some() { "  (class scores)" } else { "" }
        );
    }

    let offsets = to_host(output.vote.offsets.clone())?;
    let mean_shift = offsets
        .chunks_exact(3)
        .map(|o| (o[0] * o[0] + o[1] * o[1] + o[2] * o[2]).sqrt())
        .sum::<f32>()
        / (offsets.len() / 3) as f32;

    println!();
    println!("Centers:          {:?}", output.centers.dims());
    println!("Center features:  {:?}", output.centers_features.dims());
    println!("Mean vote shift:  {:.3}", mean_shift);
    println!(
        "Fusion index:     level {} -> level {}, {} per frame",
        backbone.chain().levels().low,
        backbone.chain().levels().high,
        output.fusion_index.len()
    );
    println!("Sample lists in:  {}/sample_list_save/", OUTPUT_DIR);

    Ok(())
}
