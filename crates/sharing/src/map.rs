//! Placement views of an object: a JSON list of piece locations and an SVG
//! dot-grid world map weighted by piece count.

use axum::body::Body;
use axum::response::Response;
use http::{header, StatusCode};
use serde::Serialize;

use crate::error::{Error, ResultExt};
use crate::handler::Handler;
use crate::present::ParsedRequest;

pub(crate) const DEFAULT_MAP_WIDTH: u32 = 800;

const ZERO_PIECES_NOTE: &str = r#"<text x="50%" y="85%" dominant-baseline="middle" text-anchor="middle"
    style="font-family:sans-serif;font-size:18px;fill:#6c757d;fill-opacity:1;">
    Small files are stored as metadata with strong encryption.
  </text>
</svg>"#;

#[derive(Debug, Serialize)]
struct Location {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Serialize)]
struct LocationSummary {
    locations: Vec<Location>,
    #[serde(rename = "pieceCount")]
    piece_count: i64,
}

impl Handler {
    async fn get_locations(&self, pr: &ParsedRequest) -> Result<(Vec<Location>, i64), Error> {
        let project = self
            .inner
            .store
            .open_project(&pr.access)
            .await
            .action("open project")?;
        let summary = project
            .object_ip_summary(&pr.bucket, &pr.real_key)
            .await
            .action("get locations");
        if let Err(err) = project.close().await {
            tracing::warn!(error = %err, "unable to close project");
        }
        let summary = summary?;

        // locations must always serialize as an array, never null
        let mut locations = Vec::with_capacity(summary.ip_ports.len());
        if let Some(mapper) = &self.inner.mapper {
            for ip in &summary.ip_ports {
                match mapper.get_ip_info(ip) {
                    Ok(info) => locations.push(Location {
                        latitude: info.latitude,
                        longitude: info.longitude,
                    }),
                    Err(err) => {
                        tracing::error!(error = %err, "failed to get IP info");
                    }
                }
            }
        }
        Ok((locations, summary.piece_count))
    }

    pub(crate) async fn serve_locations(&self, pr: &ParsedRequest) -> Result<Response, Error> {
        let (locations, piece_count) = self.get_locations(pr).await?;
        let body = serde_json::to_vec(&LocationSummary {
            locations,
            piece_count,
        })
        .map_err(|err| Error::msg(err.to_string()))?;

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .map_err(|err| Error::msg(err.to_string()))
    }

    pub(crate) async fn serve_map(&self, pr: &ParsedRequest, width: u32) -> Result<Response, Error> {
        let (locations, pieces) = self.get_locations(pr).await?;

        let mut map = WorldMap::reference();
        for location in &locations {
            map.add_load(
                location.latitude as f32,
                location.longitude as f32,
                1.0 / pieces.max(1) as f32,
            );
        }

        let mut svg = map.encode_svg(width, width / 2);
        if pieces == 0 {
            svg = svg.replacen("</svg>", ZERO_PIECES_NOTE, 1);
        }

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "image/svg+xml")
            .header(header::CONTENT_LENGTH, svg.len())
            .body(Body::from(svg))
            .map_err(|err| Error::msg(err.to_string()))
    }
}

struct Dot {
    lat: f32,
    long: f32,
    load: f32,
}

/// A dot-grid world map on an equirectangular projection.
struct WorldMap {
    dots: Vec<Dot>,
}

impl WorldMap {
    /// The reference grid: dots every four degrees across the inhabited
    /// latitudes.
    fn reference() -> Self {
        let mut dots = Vec::new();
        let mut lat = -56i32;
        while lat <= 72 {
            let mut long = -168i32;
            while long <= 180 {
                dots.push(Dot {
                    lat: lat as f32,
                    long: long as f32,
                    load: 0.0,
                });
                long += 4;
            }
            lat += 4;
        }
        Self { dots }
    }

    /// Add `amount` of load to the dot nearest the given coordinates.
    fn add_load(&mut self, lat: f32, long: f32, amount: f32) {
        let nearest = self.dots.iter_mut().min_by(|a, b| {
            let da = (a.lat - lat).powi(2) + (a.long - long).powi(2);
            let db = (b.lat - lat).powi(2) + (b.long - long).powi(2);
            da.total_cmp(&db)
        });
        if let Some(dot) = nearest {
            dot.load += amount;
        }
    }

    /// Render to SVG at the given pixel dimensions.
    fn encode_svg(&self, width: u32, height: u32) -> String {
        let w = width as f32;
        let h = height.max(1) as f32;
        let base_radius = (w / 360.0).max(1.0);

        let mut svg = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}">"#
        );
        svg.push('\n');
        for dot in &self.dots {
            let cx = (dot.long + 180.0) / 360.0 * w;
            let cy = (90.0 - dot.lat) / 180.0 * h;
            if dot.load > 0.0 {
                let radius = base_radius * (1.0 + dot.load.min(1.0));
                svg.push_str(&format!(
                    r##"<circle cx="{cx:.1}" cy="{cy:.1}" r="{radius:.1}" fill="#2683ff"/>"##
                ));
            } else {
                svg.push_str(&format!(
                    r##"<circle cx="{cx:.1}" cy="{cy:.1}" r="{base_radius:.1}" fill="#2c3236" fill-opacity="0.35"/>"##
                ));
            }
            svg.push('\n');
        }
        svg.push_str("</svg>");
        svg
    }
}
