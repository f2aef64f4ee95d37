//! HTML chart page for a histogram

use minijinja::{context, Environment};

use crate::error::BenchError;
use crate::histogram::HistogramBucket;

/// Render a self-contained chart page: per-second rates and backlog per bucket
pub fn histogram_html(
    target_name: &str,
    buckets: &[HistogramBucket],
    interval_seconds: i64,
) -> Result<String, BenchError> {
    let interval = interval_seconds.max(1);
    let per_second = |count: u64| count as f64 / interval as f64;

    let times: Vec<i64> = (1..=buckets.len() as i64).map(|i| i * interval).collect();
    let started: Vec<f64> = buckets.iter().map(|b| per_second(b.started)).collect();
    let execution: Vec<f64> = buckets.iter().map(|b| per_second(b.execution_began)).collect();
    let closed: Vec<f64> = buckets.iter().map(|b| per_second(b.closed)).collect();
    let backlog: Vec<u64> = buckets.iter().map(|b| b.backlog).collect();

    let mut env = Environment::new();
    env.add_template("histogram.html", HISTOGRAM_TEMPLATE)
        .map_err(render_error)?;
    let template = env.get_template("histogram.html").map_err(render_error)?;

    template
        .render(context! {
            target_name => target_name,
            interval => interval,
            bucket_count => buckets.len(),
            total_started => buckets.iter().map(|b| b.started).sum::<u64>(),
            peak_backlog => backlog.iter().copied().max().unwrap_or(0),
            times => serde_json::to_string(&times)?,
            started => serde_json::to_string(&started)?,
            execution => serde_json::to_string(&execution)?,
            closed => serde_json::to_string(&closed)?,
            backlog => serde_json::to_string(&backlog)?,
            buckets => buckets,
        })
        .map_err(render_error)
}

fn render_error(err: minijinja::Error) -> BenchError {
    BenchError::Serialization(format!("rendering histogram page: {err}"))
}

const HISTOGRAM_TEMPLATE: &str = r##"
<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Benchmark: {{ target_name }}</title>
    <script src="https://cdn.jsdelivr.net/npm/chart.js"></script>
    <style>
        :root {
            --bg-primary: #1a1a2e;
            --bg-card: #1f2940;
            --text-primary: #eee;
            --text-secondary: #888;
            --accent: #0f3460;
            --success: #00d26a;
        }

        body {
            margin: 0;
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: var(--bg-primary);
            color: var(--text-primary);
        }

        .container {
            max-width: 1440px;
            margin: 0 auto;
            padding: 20px;
        }

        .stats-grid {
            display: grid;
            grid-template-columns: repeat(auto-fit, minmax(200px, 1fr));
            gap: 20px;
            margin-bottom: 30px;
        }

        .stat-card, .chart-container, details {
            background: var(--bg-card);
            padding: 20px;
            border-radius: 10px;
            margin-bottom: 20px;
        }

        .stat-value {
            font-size: 2rem;
            font-weight: bold;
            color: var(--success);
        }

        .stat-label {
            color: var(--text-secondary);
        }

        table {
            width: 100%;
            border-collapse: collapse;
        }

        th, td {
            padding: 8px;
            text-align: right;
            border-bottom: 1px solid var(--accent);
            font-family: monospace;
        }
    </style>
</head>
<body>
<div class="container">
    <h1>Benchmark: {{ target_name }}</h1>

    <div class="stats-grid">
        <div class="stat-card">
            <div class="stat-value">{{ total_started }}</div>
            <div class="stat-label">Workflows started</div>
        </div>
        <div class="stat-card">
            <div class="stat-value">{{ peak_backlog }}</div>
            <div class="stat-label">Peak backlog</div>
        </div>
        <div class="stat-card">
            <div class="stat-value">{{ bucket_count }} x {{ interval }}s</div>
            <div class="stat-label">Buckets</div>
        </div>
    </div>

    <div class="chart-container">
        <canvas id="histogram"></canvas>
    </div>

    <details>
        <summary>Raw buckets</summary>
        <table>
            <tr><th>Time (s)</th><th>Started</th><th>Execution</th><th>Closed</th><th>Backlog</th></tr>
            {% for b in buckets %}
            <tr>
                <td>{{ loop.index * interval }}</td>
                <td>{{ b.started }}</td>
                <td>{{ b.execution }}</td>
                <td>{{ b.closed }}</td>
                <td>{{ b.backlog }}</td>
            </tr>
            {% endfor %}
        </table>
    </details>
</div>

<script>
    const times = {{ times }};
    new Chart(document.getElementById('histogram'), {
        type: 'line',
        data: {
            labels: times,
            datasets: [
                { label: 'Workflows Started Rate', data: {{ started }}, yAxisID: 'rate', tension: 0.3 },
                { label: 'Workflows Execution Rate', data: {{ execution }}, yAxisID: 'rate', tension: 0.3 },
                { label: 'Workflows Closed Rate', data: {{ closed }}, yAxisID: 'rate', tension: 0.3 },
                { label: 'Backlog', data: {{ backlog }}, yAxisID: 'backlog', tension: 0.3 }
            ]
        },
        options: {
            interaction: { mode: 'index', intersect: false },
            scales: {
                x: { title: { display: true, text: 'Time (s)' } },
                rate: { position: 'left', title: { display: true, text: 'per second' } },
                backlog: { position: 'right', title: { display: true, text: 'backlog' }, grid: { drawOnChartArea: false } }
            }
        }
    });
</script>
</body>
</html>
"##;
