//! SSD anchor centres for the 192x192 MediaPipe palm detector.

/// One output layer of the detector: a square feature map with a fixed number
/// of anchors per cell.
struct AnchorLayer {
    grid: u32,
    anchors_per_cell: u32,
}

// Stride 8 feeds one 24x24 map; the three stride-16 layers share a 12x12 map.
const PALM_LAYERS: [AnchorLayer; 2] = [
    AnchorLayer {
        grid: 24,
        anchors_per_cell: 2,
    },
    AnchorLayer {
        grid: 12,
        anchors_per_cell: 6,
    },
];

pub const NUM_ANCHORS: usize = 2016;

/// `[x_center, y_center]` of every anchor in output order, each in `0..1`.
pub fn palm_anchors() -> Vec<[f32; 2]> {
    let mut anchors = Vec::with_capacity(NUM_ANCHORS);
    for layer in &PALM_LAYERS {
        for y in 0..layer.grid {
            for x in 0..layer.grid {
                let center = [
                    (x as f32 + 0.5) / layer.grid as f32,
                    (y as f32 + 0.5) / layer.grid as f32,
                ];
                for _ in 0..layer.anchors_per_cell {
                    anchors.push(center);
                }
            }
        }
    }
    anchors
}
